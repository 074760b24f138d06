//! End-to-end HTTP scenarios (§8), grounded on the teacher's
//! `crates/stream/src/server.rs` test module: `#[tokio::test]` functions
//! driving the full router through `tower::ServiceExt::oneshot`, no socket
//! bound.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use durable_streams_core::store::memory::MemoryStore;
use durable_streams_core::{CursorConfig, CursorPolicy, Pipeline, ServerOptions};
use durable_streams_http::create_router;
use tower::ServiceExt;

fn test_router() -> axum::Router {
    let pipeline = Pipeline::new(
        Arc::new(MemoryStore::default()),
        Arc::new(CursorPolicy::new(CursorConfig::default())),
        ServerOptions {
            long_poll_timeout: Duration::from_millis(200),
            sse_lifetime: Duration::from_millis(500),
            ..ServerOptions::default()
        },
    );
    create_router(Arc::new(pipeline))
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// Scenario 1: create, append, catch-up read.
#[tokio::test]
async fn create_append_read() {
    let app = test_router();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(resp.headers().get("stream-next-offset").unwrap(), "0000000000000000_0000000000000000");

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/s?offset=-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("stream-up-to-date").unwrap(), "true");
    let etag = resp.headers().get("etag").cloned();
    assert_eq!(body_bytes(resp).await, b"hello");
    assert!(etag.is_some());
}

/// Scenario 2: conditional 304 once the client is caught up.
#[tokio::test]
async fn conditional_not_modified() {
    let app = test_router();

    app.clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/s?offset=-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let etag = resp.headers().get("etag").unwrap().clone();

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/s?offset=-1")
                .header("If-None-Match", etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(resp.headers().get("stream-up-to-date").unwrap(), "true");
}

/// Scenario 3: long-poll with no new data returns 204 at the timeout.
#[tokio::test]
async fn long_poll_times_out() {
    let app = test_router();
    app.clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/s?live=long-poll&offset=0000000000000000_0000000000000000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(resp.headers().get("stream-up-to-date").unwrap(), "true");
    assert!(resp.headers().get("stream-cursor").is_some());
}

/// Scenario 4: an in-flight long-poll wakes up once an append lands.
#[tokio::test]
async fn long_poll_wakes_on_append() {
    let app = test_router();
    app.clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let waiter_app = app.clone();
    let waiter = tokio::spawn(async move {
        waiter_app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/s?live=long-poll&offset=0000000000000000_0000000000000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri("/s")
            .header("Content-Type", "text/plain")
            .body(Body::from("!"))
            .unwrap(),
    )
    .await
    .unwrap();

    let resp = waiter.await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, b"!");
}

/// Scenario 5: idempotent create on matching config, conflict on mismatch.
#[tokio::test]
async fn idempotent_create_then_conflict() {
    let app = test_router();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

/// Scenario 6: a lower Stream-Seq after a higher one is rejected.
#[tokio::test]
async fn sequence_regression_is_rejected() {
    let app = test_router();
    app.clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .header("Stream-Seq", "10")
                .body(Body::from("a"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .header("Stream-Seq", "9")
                .body(Body::from("b"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

/// Scenario 8: deleting a stream releases any in-flight long-poll with 404.
#[tokio::test]
async fn delete_releases_long_poll_waiter() {
    let app = test_router();
    app.clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let waiter_app = app.clone();
    let waiter = tokio::spawn(async move {
        waiter_app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/s?live=long-poll&offset=0000000000000000_0000000000000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    app.oneshot(Request::builder().method("DELETE").uri("/s").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let resp = waiter.await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

/// §4.6/§7: a live GET missing `offset` is a 400, for both long-poll and SSE.
#[tokio::test]
async fn live_read_without_offset_is_bad_request() {
    let app = test_router();
    app.clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/s?live=long-poll")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/s?live=sse")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

/// §6: SSE responses carry `Cache-Control: no-store`, not axum's default
/// `no-cache` from `Sse::into_response`.
#[tokio::test]
async fn sse_response_carries_no_store_cache_control() {
    let app = test_router();
    app.clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/s")
                .header("Content-Type", "text/plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/s?live=sse&offset=-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
}

/// Unknown verbs are rejected with 405 and Cache-Control: no-store.
#[tokio::test]
async fn unknown_method_is_405() {
    let app = test_router();
    let resp = app
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/s")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}
