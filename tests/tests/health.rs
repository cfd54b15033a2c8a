//! Tests for health check endpoints.
//!
//! These tests verify the health endpoints return correct status and structure.

use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::{fixtures, setup::TestContext};

/// Test /health endpoint returns proper structure
#[tokio::test]
async fn test_health_endpoint_structure() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    server
        .post("/api/events")
        .json(&fixtures::pageview("v1", "s1", "/"))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let status = body["status"].as_str().unwrap_or("");
    assert!(
        status == "healthy" || status == "degraded" || status == "unhealthy",
        "Status should be 'healthy', 'degraded', or 'unhealthy', got '{}'",
        status
    );
    assert!(body.get("storage_connected").is_some());
    assert_eq!(body["buffer_open"], true);
    assert_eq!(body["buffer_depth"], 1);
    assert!(body["report"]["components"].is_array());
}

/// Test /health/live always answers while the process runs
#[tokio::test]
async fn test_liveness_reports_running() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    server.get("/health/live").await.assert_status_ok();
}

/// Test /health/ready flips once the buffer closes
#[tokio::test]
async fn test_readiness_follows_buffer() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    server.get("/health/ready").await.assert_status_ok();

    ctx.buffer
        .shutdown(Duration::from_secs(1))
        .await
        .expect("empty buffer drains immediately");

    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    let body: serde_json::Value = server.get("/health").await.json();
    assert_eq!(body["buffer_open"], false);
}
