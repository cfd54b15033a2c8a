//! Tests for error handling in the ingest pipeline.
//!
//! These tests verify that the API returns correct status codes and error
//! codes, and that rejected requests leave nothing in the buffer.

use axum::http::StatusCode;
use axum_test::TestServer;
use buffer::BufferConfig;
use chrono::Utc;
use engine_core::{QuotaDecision, UnknownQuotaPolicy};
use integration_tests::{
    fixtures,
    setup::{TestContext, TestOptions},
};
use serde_json::json;

/// Missing required field names that field.
#[tokio::test]
async fn test_missing_visitor_id_returns_400() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let mut event = fixtures::pageview("v1", "s1", "/");
    event.as_object_mut().unwrap().remove("visitorId");

    let response = server.post("/api/events").json(&event).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
    assert_eq!(body["field"], "visitorId");
    assert_eq!(ctx.buffer.pending(), 0);
}

/// One bad event rejects the whole batch with its index.
#[tokio::test]
async fn test_invalid_event_rejects_whole_batch() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let events = vec![
        fixtures::pageview("v1", "s1", "/a"),
        fixtures::pageview("v1", "s1", "/b"),
        fixtures::pageview("v1", "s1", "not a url"),
        fixtures::pageview("v1", "s1", "/c"),
    ];
    let response = server
        .post("/api/events/batch")
        .json(&fixtures::batch(events))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["field"], "events[2].page");
    assert_eq!(ctx.buffer.pending(), 0);
}

/// Batches over 1000 events return VALID_002.
#[tokio::test]
async fn test_oversized_batch_returns_400() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/api/events/batch")
        .json(&fixtures::oversized_batch())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_002");
    assert_eq!(ctx.buffer.pending(), 0);
}

/// Custom events need a name.
#[tokio::test]
async fn test_custom_event_without_name_returns_400() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let mut event = fixtures::pageview("v1", "s1", "/");
    event["type"] = json!("custom");

    let response = server.post("/api/events").json(&event).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["field"], "eventName");
}

/// Timestamps more than five minutes ahead are refused.
#[tokio::test]
async fn test_future_timestamp_returns_400() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let event = fixtures::at(
        fixtures::pageview("v1", "s1", "/"),
        Utc::now() + chrono::Duration::hours(1),
    );
    let response = server.post("/api/events").json(&event).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["field"], "timestamp");
}

/// Out-of-range time on page is refused.
#[tokio::test]
async fn test_time_on_page_out_of_range_returns_400() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let mut event = fixtures::pageview("v1", "s1", "/");
    event["timeOnPage"] = json!(90_000);

    let response = server.post("/api/events").json(&event).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["field"], "timeOnPage");
}

/// Malformed JSON is a validation error on the body.
#[tokio::test]
async fn test_malformed_json_returns_400() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/api/events")
        .content_type("application/json")
        .bytes("{not json".into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
    assert_eq!(body["field"], "body");
}

/// Denied websites get 403 and nothing is queued.
#[tokio::test]
async fn test_quota_denied_returns_403() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    ctx.quota.deny(fixtures::SITE, "monthly event limit reached");

    let response = server
        .post("/api/events")
        .json(&fixtures::pageview("v1", "s1", "/"))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "QUOTA_001");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("monthly event limit reached"));
    assert_eq!(ctx.buffer.pending(), 0);
}

/// Unknown quota is allowed by default.
#[tokio::test]
async fn test_unknown_quota_fails_open_by_default() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    ctx.quota.set(fixtures::SITE, QuotaDecision::Unknown);

    server
        .post("/api/events")
        .json(&fixtures::pageview("v1", "s1", "/"))
        .await
        .assert_status(StatusCode::ACCEPTED);
    assert_eq!(ctx.buffer.pending(), 1);
}

/// Unknown quota is refused when the policy says deny.
#[tokio::test]
async fn test_unknown_quota_denied_by_policy() {
    let ctx = TestContext::with_options(TestOptions {
        unknown_quota_policy: UnknownQuotaPolicy::Deny,
        ..TestOptions::default()
    })
    .await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    ctx.quota.set(fixtures::SITE, QuotaDecision::Unknown);

    let response = server
        .post("/api/events")
        .json(&fixtures::pageview("v1", "s1", "/"))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(ctx.buffer.pending(), 0);
}

/// A full buffer answers 503 with Retry-After and keeps what it had.
#[tokio::test]
async fn test_full_buffer_returns_503_with_retry_after() {
    let options = TestOptions::default();
    let ctx = TestContext::with_options(TestOptions {
        buffer: BufferConfig {
            max_pending: 5,
            ..options.buffer.clone()
        },
        ..options
    })
    .await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let events = fixtures::interleaved_pageviews(4, &["v1"]);
    server
        .post("/api/events/batch")
        .json(&fixtures::batch(events))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let events = fixtures::interleaved_pageviews(2, &["v2"]);
    let response = server
        .post("/api/events/batch")
        .json(&fixtures::batch(events))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "BUF_001");
    assert!(response.headers().get("retry-after").is_some());
    assert_eq!(ctx.buffer.pending(), 4);
}

/// Exhausted retries drop the batch without failing the request that
/// queued it.
#[tokio::test]
async fn test_exhausted_retries_drop_batch() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    server
        .post("/api/events")
        .json(&fixtures::pageview("v1", "s1", "/"))
        .await
        .assert_status(StatusCode::ACCEPTED);

    ctx.store.fail_next_writes(usize::MAX);
    let report = ctx.flush().await;

    assert!(report.is_dropped());
    assert_eq!(ctx.store.write_attempts(), 4);
    assert_eq!(ctx.store.event_count(), 0);
    assert_eq!(ctx.buffer.pending(), 0);
}
