//! Cache proxy HTTP handlers.

use crate::error::{ApiError, ApiResult};
use crate::index::{CacheEntry, Leader};
use crate::state::ProxyState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, ETAG};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use dcdn_core::{Fingerprint, Verifier, headers};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

/// Query parameters of the `/cache` endpoint. Either may instead arrive as
/// a request header of the same name; the query form is canonical.
#[derive(Debug, Deserialize)]
pub struct CacheParams {
    hash: Option<String>,
    url: Option<String>,
}

/// GET /cache?hash=<fingerprint>&url=<origin-url> - serve content-addressed
/// bytes, downloading them from the origin at most once per digest.
pub async fn serve_cache(
    State(state): State<ProxyState>,
    Query(params): Query<CacheParams>,
    request_headers: HeaderMap,
) -> ApiResult<Response> {
    let header_param = |name: &str| {
        request_headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    let raw_hash = params
        .hash
        .or_else(|| header_param("hash"))
        .ok_or_else(|| ApiError::BadRequest("missing hash in query".to_string()))?;
    let raw_url = params
        .url
        .or_else(|| header_param("url"))
        .ok_or_else(|| ApiError::BadRequest("missing url in query".to_string()))?;

    let fingerprint = state
        .registry
        .parse(&raw_hash)
        .map_err(|e| ApiError::BadRequest(format!("invalid hash: {e}")))?;
    let source = Url::parse(&raw_url)
        .map_err(|e| ApiError::BadRequest(format!("invalid source url: {e}")))?;

    // canonical text form keys the index, whatever casing the caller used
    let digest = fingerprint.to_string();
    let lease = state
        .index
        .acquire(digest.clone())
        .await
        .map_err(|e| ApiError::Internal(format!("cache index unavailable: {e}")))?;

    if let Some(leader) = lease.leader {
        // the download runs in its own task: a caller that disconnects must
        // not be able to truncate the cache file mid-write
        let task = tokio::spawn(run_leader(
            state.clone(),
            lease.entry.clone(),
            leader,
            fingerprint,
            source,
        ));
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(digest = %digest, url = %raw_url, error = %e,
                    "failed to download data");
                return Err(ApiError::BadGateway("failed to download data".to_string()));
            }
            Err(join_error) => {
                // the task died before its own cleanup could run
                tracing::error!(digest = %digest, error = %join_error, "download task died");
                if let Some(orphan) = lease.entry.tombstone() {
                    state.index.schedule_delete(orphan);
                }
                state.index.notify_failure(digest);
                return Err(ApiError::BadGateway("failed to download data".to_string()));
            }
        }
    } else if !lease.entry.ready().await {
        return Err(ApiError::BadGateway("failed to download data".to_string()));
    }

    let Some(path) = lease.entry.current_path() else {
        // tombstoned while we waited: the leader's download failed
        return Err(ApiError::BadGateway("failed to download data".to_string()));
    };
    lease.entry.touch();

    let file = fs::File::open(&path).await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to open cache file");
        ApiError::BadGateway("failed to load cache file".to_string())
    })?;

    let length = file
        .metadata()
        .await
        .map(|m| m.len())
        .map_err(|e| ApiError::Internal(format!("failed to stat cache file: {e}")))?;

    Ok((
        StatusCode::OK,
        [
            (HeaderName::from_static(headers::DCDN), "cache".to_string()),
            (HeaderName::from_static(headers::DCDN_HASH), digest.clone()),
            (ETAG, digest),
            (
                CACHE_CONTROL,
                "public, only-if-cached, immutable, no-transform".to_string(),
            ),
            (CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// Download errors local to the leader path.
#[derive(Debug, thiserror::Error)]
enum DownloadError {
    #[error(transparent)]
    Client(#[from] dcdn_client::ClientError),

    #[error(transparent)]
    Verify(#[from] dcdn_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Perform the leader download, with full success/failure bookkeeping.
async fn run_leader(
    state: ProxyState,
    entry: Arc<CacheEntry>,
    leader: Leader,
    fingerprint: Fingerprint,
    source: Url,
) -> Result<(), DownloadError> {
    let Leader { mut file, done } = leader;
    let result = async {
        let verifier = state.registry.verifier(&fingerprint)?;
        download_into(&state, verifier, &source, &mut file).await
    }
    .await;
    drop(file);

    match result {
        Ok(()) => {
            // file is fully written and verified before anyone is woken
            let _ = done.send(true);
            Ok(())
        }
        Err(e) => {
            state.index.abort(&entry, done);
            Err(e)
        }
    }
}

/// Tee the origin body into the cache file and the verifier.
async fn download_into(
    state: &ProxyState,
    mut verifier: Verifier,
    source: &Url,
    file: &mut fs::File,
) -> Result<(), DownloadError> {
    let mut response = state.client.get(source.clone()).await?;
    while let Some(chunk) = response.chunk().await? {
        verifier.write(&chunk)?;
        file.write_all(&chunk).await?;
    }
    verifier.verify()?;
    file.flush().await?;
    Ok(())
}

/// Health check response body.
#[derive(Debug, Serialize)]
pub struct CdnStatus {
    status: &'static str,
}

/// GET /checkcdn - liveness probe for the discovery service.
pub async fn check_cdn() -> impl IntoResponse {
    (
        [(HeaderName::from_static(headers::DCDN), "cache")],
        Json(CdnStatus { status: "active" }),
    )
}
