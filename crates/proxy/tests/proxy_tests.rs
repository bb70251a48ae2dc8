//! Integration tests for the cache proxy.
//!
//! These spin up a real origin server on a loopback listener (the proxy's
//! resolver talks HTTP) and drive the proxy router in-process.

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use bytes::Bytes;
use dcdn_client::Client;
use dcdn_core::HashRegistry;
use dcdn_proxy::{CacheIndex, ProxyState, create_router};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tower::ServiceExt;

struct TestOrigin {
    base: String,
    hits: Arc<AtomicUsize>,
}

impl TestOrigin {
    fn file_url(&self) -> String {
        format!("{}/file", self.base)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Origin serving one file at `/file` with the given fingerprint header.
async fn spawn_origin(body: Bytes, declared_hash: String, delay: Duration) -> TestOrigin {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new().route(
        "/file",
        get({
            let hits = hits.clone();
            move || {
                let body = body.clone();
                let declared = declared_hash.clone();
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    (
                        [("x-dcdn", "server"), ("x-dcdn-hash", declared.as_str())],
                        body,
                    )
                        .into_response()
                }
            }
        }),
    );
    let base = serve(router).await;
    TestOrigin { base, hits }
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn proxy_router(dir: &std::path::Path) -> Router {
    let index = CacheIndex::new(dir).await.expect("cache index");
    create_router(ProxyState {
        index,
        client: Arc::new(Client::new()),
        registry: HashRegistry::global(),
    })
}

fn canonical_hash(data: &[u8]) -> String {
    format!(
        "sha256:{}:{}",
        hex::encode(Sha256::digest(data)),
        data.len()
    )
}

async fn request_cache(router: &Router, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

fn cache_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn downloads_verifies_and_serves() {
    let data = Bytes::from_static(b"cached payload");
    let hash = canonical_hash(&data);
    let origin = spawn_origin(data.clone(), hash.clone(), Duration::ZERO).await;

    let dir = tempfile::tempdir().unwrap();
    let router = proxy_router(dir.path()).await;

    let uri = format!("/cache?hash={hash}&url={}", origin.file_url());
    let (status, headers, body) = request_cache(&router, &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, data);
    assert_eq!(headers.get("x-dcdn").unwrap(), "cache");
    assert_eq!(headers.get("x-dcdn-hash").unwrap(), hash.as_str());
    assert_eq!(headers.get("etag").unwrap(), hash.as_str());
    let cache_control = headers.get("cache-control").unwrap().to_str().unwrap();
    for directive in ["public", "only-if-cached", "immutable", "no-transform"] {
        assert!(cache_control.contains(directive), "missing {directive}");
    }

    assert_eq!(origin.hits(), 1);
    assert_eq!(cache_files(dir.path()), vec!["0.cache"]);
    assert_eq!(std::fs::read(dir.path().join("0.cache")).unwrap(), data);
}

#[tokio::test]
async fn repeat_request_is_served_from_cache() {
    let data = Bytes::from_static(b"serve me twice");
    let hash = canonical_hash(&data);
    let origin = spawn_origin(data.clone(), hash.clone(), Duration::ZERO).await;

    let dir = tempfile::tempdir().unwrap();
    let router = proxy_router(dir.path()).await;
    let uri = format!("/cache?hash={hash}&url={}", origin.file_url());

    let (status, _headers, first) = request_cache(&router, &uri).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _headers, second) = request_cache(&router, &uri).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(first, second);
    assert_eq!(origin.hits(), 1);
}

#[tokio::test]
async fn concurrent_requests_collapse_to_one_download() {
    let data = Bytes::from(vec![0xa5u8; 64 * 1024]);
    let hash = canonical_hash(&data);
    // slow origin so every caller arrives while the download is in flight
    let origin = spawn_origin(data.clone(), hash.clone(), Duration::from_millis(200)).await;

    let dir = tempfile::tempdir().unwrap();
    let router = proxy_router(dir.path()).await;
    let uri = format!("/cache?hash={hash}&url={}", origin.file_url());

    let mut tasks = JoinSet::new();
    for _ in 0..100 {
        let router = router.clone();
        let uri = uri.clone();
        tasks.spawn(async move { request_cache(&router, &uri).await });
    }

    let mut served = 0;
    while let Some(result) = tasks.join_next().await {
        let (status, _headers, body) = result.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, data);
        served += 1;
    }
    assert_eq!(served, 100);
    assert_eq!(origin.hits(), 1);
}

#[tokio::test]
async fn wrong_length_body_fails_everyone_and_cleans_up() {
    let data = Bytes::from_static(b"short body");
    // declared length is one byte longer than what the origin serves
    let bad_hash = format!(
        "sha256:{}:{}",
        hex::encode(Sha256::digest(&data)),
        data.len() + 1
    );
    let origin = spawn_origin(data.clone(), bad_hash.clone(), Duration::from_millis(100)).await;

    let dir = tempfile::tempdir().unwrap();
    let router = proxy_router(dir.path()).await;
    let uri = format!("/cache?hash={bad_hash}&url={}", origin.file_url());

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let router = router.clone();
        let uri = uri.clone();
        tasks.spawn(async move { request_cache(&router, &uri).await });
    }
    while let Some(result) = tasks.join_next().await {
        let (status, _headers, _body) = result.unwrap();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    // the partial file is unlinked by the deletion workers
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cache_files(dir.path()).is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "failed cache file was not deleted: {:?}",
            cache_files(dir.path())
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // the failed entry is removed from the index: a later request elects a
    // new leader and reaches the origin again. Each failure tombstoned its
    // entry, so every origin hit so far came from a fresh leader election.
    let first_round_hits = origin.hits();
    assert!(first_round_hits >= 1);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (status, _headers, _body) = request_cache(&router, &uri).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        if origin.hits() > first_round_hits {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "failed entry was never removed from the index"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn corrupted_body_is_rejected() {
    let data = Bytes::from_static(b"actual bytes");
    // fingerprint of different content, same length
    let wrong = canonical_hash(b"expectedryte");
    let origin = spawn_origin(data.clone(), wrong.clone(), Duration::ZERO).await;

    let dir = tempfile::tempdir().unwrap();
    let router = proxy_router(dir.path()).await;
    let uri = format!("/cache?hash={wrong}&url={}", origin.file_url());

    let (status, _headers, _body) = request_cache(&router, &uri).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn unreachable_origin_is_bad_gateway() {
    let data = b"never fetched";
    let hash = canonical_hash(data);
    let dir = tempfile::tempdir().unwrap();
    let router = proxy_router(dir.path()).await;

    // nothing listens on port 9 (discard)
    let uri = format!("/cache?hash={hash}&url=http://127.0.0.1:9/file");
    let (status, _headers, _body) = request_cache(&router, &uri).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn parameters_accepted_from_headers() {
    let data = Bytes::from_static(b"header style");
    let hash = canonical_hash(&data);
    let origin = spawn_origin(data.clone(), hash.clone(), Duration::ZERO).await;

    let dir = tempfile::tempdir().unwrap();
    let router = proxy_router(dir.path()).await;

    let request = Request::builder()
        .uri("/cache")
        .header("hash", hash.as_str())
        .header("url", origin.file_url())
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body, data);
}

#[tokio::test]
async fn missing_or_invalid_parameters_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let router = proxy_router(dir.path()).await;

    let (status, _h, _b) = request_cache(&router, "/cache").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _h, _b) = request_cache(&router, "/cache?hash=sha256:ab:1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _h, _b) = request_cache(&router, "/cache?url=http://localhost/").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _h, _b) =
        request_cache(&router, "/cache?hash=nothash&url=http://localhost/").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _h, _b) = request_cache(&router, "/cache?hash=sha256:ab:1&url=notaurl").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_endpoint_reports_active() {
    let dir = tempfile::tempdir().unwrap();
    let router = proxy_router(dir.path()).await;

    let (status, headers, body) = request_cache(&router, "/checkcdn").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-dcdn").unwrap(), "cache");
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, serde_json::json!({"status": "active"}));
}
