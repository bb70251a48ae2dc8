//! Integration tests for the origin HTTP surface.

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use dcdn_origin::{HashCache, OriginState, create_router};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower::ServiceExt;

async fn test_router(content: &[(&str, &[u8])]) -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    for (name, data) in content {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        std::fs::write(path, data).expect("failed to write fixture");
    }
    let cache = Arc::new(HashCache::new(dir.path()).await.expect("hash cache"));
    (dir, create_router(OriginState { cache }))
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

fn expected_hash(data: &[u8]) -> String {
    format!(
        "sha256:{}:{}",
        hex::encode(Sha256::digest(data)),
        data.len()
    )
}

#[tokio::test]
async fn serves_file_with_fingerprint_headers() {
    let body = b"hello dcdn".as_slice();
    let (_dir, router) = test_router(&[("greeting.txt", body)]).await;

    let (status, headers, got) = send(&router, "GET", "/greeting.txt", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(got, body);

    let hash = expected_hash(body);
    assert_eq!(headers.get("x-dcdn").unwrap(), "server");
    assert_eq!(headers.get("x-dcdn-hash").unwrap(), hash.as_str());
    assert_eq!(headers.get("etag").unwrap(), hash.as_str());
    assert_eq!(headers.get("content-length").unwrap(), "10");
    let cache_control = headers.get("cache-control").unwrap().to_str().unwrap();
    for directive in ["public", "must-revalidate", "proxy-revalidate", "no-transform"] {
        assert!(cache_control.contains(directive), "missing {directive}");
    }
    assert!(headers.contains_key("last-modified"));
}

#[tokio::test]
async fn serves_nested_paths() {
    let (_dir, router) = test_router(&[("sub/dir/file.bin", b"nested".as_slice())]).await;
    let (status, _headers, got) = send(&router, "GET", "/sub/dir/file.bin", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(got, b"nested");
}

#[tokio::test]
async fn unknown_path_is_404() {
    let (_dir, router) = test_router(&[]).await;
    let (status, _headers, body) = send(&router, "GET", "/missing.txt", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"404 not found");
}

#[tokio::test]
async fn traversal_is_404() {
    let (_dir, router) = test_router(&[("a.txt", b"x".as_slice())]).await;
    let (status, _headers, _body) = send(&router, "GET", "/../a.txt", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_get_is_405() {
    let (_dir, router) = test_router(&[("a.txt", b"x".as_slice())]).await;
    let (status, _headers, _body) = send(&router, "POST", "/a.txt", &[]).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn matching_etag_is_not_modified() {
    let body = b"cache me".as_slice();
    let (_dir, router) = test_router(&[("a.txt", body)]).await;

    let hash = expected_hash(body);
    let (status, headers, got) =
        send(&router, "GET", "/a.txt", &[("if-none-match", hash.as_str())]).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(got.is_empty());
    // revalidation headers ride along on the 304
    assert_eq!(headers.get("x-dcdn-hash").unwrap(), hash.as_str());
}

#[tokio::test]
async fn stale_etag_is_served_in_full() {
    let body = b"cache me".as_slice();
    let (_dir, router) = test_router(&[("a.txt", body)]).await;

    let (status, _headers, got) = send(
        &router,
        "GET",
        "/a.txt",
        &[("if-none-match", "sha256:00:8")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(got, body);
}

#[tokio::test]
async fn matching_modified_since_is_not_modified() {
    let (_dir, router) = test_router(&[("a.txt", b"dated".as_slice())]).await;

    let (_status, headers, _body) = send(&router, "GET", "/a.txt", &[]).await;
    let last_modified = headers.get("last-modified").unwrap().to_str().unwrap();

    let (status, _headers, body) = send(
        &router,
        "GET",
        "/a.txt",
        &[("if-modified-since", last_modified)],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
}

#[tokio::test]
async fn unmodified_since_mismatch_is_precondition_failed() {
    let (_dir, router) = test_router(&[("a.txt", b"dated".as_slice())]).await;

    let (status, _headers, _body) = send(
        &router,
        "GET",
        "/a.txt",
        &[("if-unmodified-since", "Mon, 01 Jan 1990 00:00:00 GMT")],
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn unmodified_since_match_is_served() {
    let (_dir, router) = test_router(&[("a.txt", b"dated".as_slice())]).await;

    let (_status, headers, _body) = send(&router, "GET", "/a.txt", &[]).await;
    let last_modified = headers.get("last-modified").unwrap().to_str().unwrap();

    let (status, _headers, body) = send(
        &router,
        "GET",
        "/a.txt",
        &[("if-unmodified-since", last_modified)],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"dated");
}
