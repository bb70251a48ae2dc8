//! File-serving HTTP surface of the origin.
//!
//! Every GET path resolves against the hash cache's content directory and is
//! answered with the file body plus fingerprint headers, so DCDN clients can
//! redirect the download to a peer cache and verify what they get.

use crate::error::{ApiError, ApiResult};
use crate::hashcache::HashCache;
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    CACHE_CONTROL, CONTENT_LENGTH, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE,
    LAST_MODIFIED,
};
use axum::http::{HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use dcdn_core::headers;
use percent_encoding::percent_decode_str;
use std::path::{Component, Path};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct OriginState {
    /// Fingerprint cache over the content directory.
    pub cache: Arc<HashCache>,
}

/// Create the origin router.
pub fn create_router(state: OriginState) -> Router {
    Router::new()
        .fallback(serve_file)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Fallback handler serving any request path from the content directory.
async fn serve_file(State(state): State<OriginState>, req: Request) -> ApiResult<Response> {
    if req.method() != Method::GET {
        return Ok((
            StatusCode::METHOD_NOT_ALLOWED,
            format!("unsupported method {:?}", req.method()),
        )
            .into_response());
    }

    let rel = sanitize_path(req.uri().path()).ok_or(ApiError::NotFound)?;
    let (file, fingerprint, mtime) = state.cache.get(&rel).await?;

    let hash_text = fingerprint.to_string();
    let mtime_text = httpdate::fmt_http_date(mtime);
    let base_headers = [
        (HeaderName::from_static(headers::DCDN), "server".to_string()),
        (
            HeaderName::from_static(headers::DCDN_HASH),
            hash_text.clone(),
        ),
        (LAST_MODIFIED, mtime_text.clone()),
        (ETAG, hash_text.clone()),
        (
            CACHE_CONTROL,
            "public, must-revalidate, proxy-revalidate, no-transform".to_string(),
        ),
    ];

    let request_header = |name: HeaderName| req.headers().get(name).and_then(|v| v.to_str().ok());
    if request_header(IF_NONE_MATCH) == Some(hash_text.as_str())
        || request_header(IF_MODIFIED_SINCE) == Some(mtime_text.as_str())
    {
        return Ok((StatusCode::NOT_MODIFIED, base_headers).into_response());
    }
    if let Some(condition) = request_header(IF_UNMODIFIED_SINCE)
        && condition != mtime_text
    {
        return Ok((StatusCode::PRECONDITION_FAILED, base_headers).into_response());
    }

    tracing::debug!(path = %rel, hash = %hash_text, "serving content");
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        StatusCode::OK,
        base_headers,
        [(CONTENT_LENGTH, fingerprint.length().to_string())],
        body,
    )
        .into_response())
}

/// Decode and validate a request path into a relative content path.
///
/// Rejects anything that is not a plain relative path of normal components,
/// so request paths cannot walk out of the content directory.
fn sanitize_path(raw: &str) -> Option<String> {
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    let rel = decoded.trim_start_matches('/');
    if rel.is_empty() {
        return None;
    }
    let all_normal = Path::new(rel)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    all_normal.then(|| rel.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_accepts_plain_paths() {
        assert_eq!(sanitize_path("/a.txt").as_deref(), Some("a.txt"));
        assert_eq!(
            sanitize_path("/sub/dir/file.bin").as_deref(),
            Some("sub/dir/file.bin")
        );
        assert_eq!(
            sanitize_path("/with%20space.txt").as_deref(),
            Some("with space.txt")
        );
    }

    #[test]
    fn sanitize_rejects_traversal() {
        assert_eq!(sanitize_path("/"), None);
        assert_eq!(sanitize_path("/../etc/passwd"), None);
        assert_eq!(sanitize_path("/a/../../b"), None);
        assert_eq!(sanitize_path("/%2e%2e/escape"), None);
    }
}
