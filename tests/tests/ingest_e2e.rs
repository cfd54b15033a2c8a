//! End-to-end tests for the ingest pipeline.
//!
//! POST /api/events[/batch] → EventBuffer → MemoryStore → FunnelMatcher
//!
//! Only the storage backend is swapped for the in-memory one; routing,
//! validation, buffering and funnel matching are the production paths.

use std::collections::HashMap;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use buffer::FlushReport;
use chrono::Utc;
use engine_core::{EventType, FunnelRecord, FunnelStepRecord};
use integration_tests::{fixtures, setup::TestContext};
use serde_json::json;

/// Single event: accepted, flushed, stored with server-assigned fields.
#[tokio::test]
async fn test_single_event_reaches_storage() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/api/events")
        .json(&fixtures::pageview("visitor-1", "session-1", "https://example.com/pricing?plan=pro"))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["received"], 1);
    assert_eq!(ctx.buffer.pending(), 1);

    let report = ctx.flush().await;
    assert!(matches!(report, FlushReport::Written { accepted: 1, rejected: 0, .. }));

    let stored = ctx.store.events();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].website_id, fixtures::SITE);
    assert_eq!(stored[0].event_type, EventType::Pageview);
    assert_eq!(stored[0].path(), "/pricing");
    assert!(stored[0].received_at >= stored[0].timestamp);
}

/// 500 events across 3 interleaved visitors keep per-visitor order.
#[tokio::test]
async fn test_interleaved_visitors_keep_order() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let visitors = ["alice", "bob", "carol"];
    let events = fixtures::interleaved_pageviews(500, &visitors);

    for chunk in events.chunks(100) {
        server
            .post("/api/events/batch")
            .json(&fixtures::batch(chunk.to_vec()))
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    let report = ctx.flush().await;
    assert_eq!(report.events(), 500);
    assert_eq!(ctx.store.event_count(), 500);

    let mut sequences: HashMap<String, Vec<u64>> = HashMap::new();
    for event in ctx.store.events() {
        let seq = event
            .property("seq")
            .and_then(|v| v.as_u64())
            .expect("seq property");
        sequences.entry(event.visitor_id.clone()).or_default().push(seq);
    }

    assert_eq!(sequences.len(), 3);
    for (visitor, seqs) in &sequences {
        let expected: Vec<u64> = (0..seqs.len() as u64).collect();
        assert_eq!(seqs, &expected, "order broken for {}", visitor);
    }
}

/// Events flushed through the buffer drive funnel progress to conversion.
#[tokio::test]
async fn test_funnel_converts_through_pipeline() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let funnel = FunnelRecord::new(
        fixtures::SITE,
        "signup",
        vec![
            FunnelStepRecord::page(1, "/pricing"),
            FunnelStepRecord::event(2, "signup_*"),
            FunnelStepRecord::custom(3, "plan", json!("pro")),
        ],
    );
    let funnel_id = funnel.id;
    ctx.store.add_funnel(funnel);

    let start = Utc::now() - chrono::Duration::minutes(10);
    let events = vec![
        fixtures::at(fixtures::pageview("v1", "s1", "/pricing/"), start),
        fixtures::at(
            fixtures::custom_event("v1", "s1", "/signup", "signup_started"),
            start + chrono::Duration::seconds(30),
        ),
        fixtures::at(
            fixtures::with_property(
                fixtures::custom_event("v1", "s2", "/welcome", "plan_selected"),
                "plan",
                json!("pro"),
            ),
            start + chrono::Duration::seconds(90),
        ),
        // A second visitor who only starts
        fixtures::at(fixtures::pageview("v2", "s9", "/pricing"), start),
    ];

    server
        .post("/api/events/batch")
        .json(&fixtures::batch(events))
        .await
        .assert_status(StatusCode::ACCEPTED);
    ctx.flush().await;

    let converted = ctx.store.progress(fixtures::SITE, funnel_id, "v1").expect("progress for v1");
    assert!(converted.converted);
    assert_eq!(converted.current_step, 2);
    assert_eq!(converted.session_id, "s2");

    let started = ctx.store.progress(fixtures::SITE, funnel_id, "v2").expect("progress for v2");
    assert!(!started.converted);
    assert_eq!(started.current_step, 0);

    assert_eq!(ctx.store.analytics_totals(funnel_id), (2, 1, 90_000));
    assert_eq!(ctx.store.step_rows().len(), 4);
}

/// Shutdown drains pending events and then refuses new ones.
#[tokio::test]
async fn test_shutdown_drains_then_rejects() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let events = fixtures::interleaved_pageviews(25, &["a", "b"]);
    server
        .post("/api/events/batch")
        .json(&fixtures::batch(events))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let report = ctx
        .buffer
        .shutdown(Duration::from_secs(5))
        .await
        .expect("shutdown within deadline");
    assert_eq!(report.events(), 25);
    assert_eq!(ctx.store.event_count(), 25);

    let response = server
        .post("/api/events")
        .json(&fixtures::pageview("late", "s", "/"))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "BUF_002");
}

/// A row outside every partition is rejected alone; the rest are stored.
#[tokio::test]
async fn test_partition_gap_rejects_only_uncovered_rows() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let ancient = Utc::now() - chrono::Duration::days(365 * 5);
    let events = vec![
        fixtures::pageview("v1", "s1", "/a"),
        fixtures::at(fixtures::pageview("v1", "s1", "/old"), ancient),
        fixtures::pageview("v1", "s1", "/b"),
    ];
    server
        .post("/api/events/batch")
        .json(&fixtures::batch(events))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let report = ctx.flush().await;
    assert!(matches!(
        report,
        FlushReport::Written { events: 3, accepted: 2, rejected: 1, retries: 0 }
    ));
    let paths: Vec<String> = ctx.store.events().iter().map(|e| e.path()).collect();
    assert_eq!(paths, vec!["/a", "/b"]);
}

/// Transient storage failures are retried within the same flush.
#[tokio::test]
async fn test_transient_storage_failure_is_retried() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    server
        .post("/api/events")
        .json(&fixtures::pageview("v1", "s1", "/"))
        .await
        .assert_status(StatusCode::ACCEPTED);

    ctx.store.fail_next_writes(2);
    let report = ctx.flush().await;
    assert!(matches!(report, FlushReport::Written { accepted: 1, retries: 2, .. }));
    assert_eq!(ctx.store.write_attempts(), 3);
}
