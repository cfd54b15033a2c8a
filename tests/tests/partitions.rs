//! Partition lifecycle against the in-memory backend.
//!
//! Covers the startup window, idempotent re-runs, retention and the effect
//! of partition coverage on event writes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use engine_core::{add_months, month_start, Event, PartitionRange, EVENTS_TABLE};
use integration_tests::setup::{TestContext, TestOptions};
use storage::MemoryStore;
use tokio::sync::watch;
use worker::{PartitionConfig, PartitionMaintenanceWorker, PartitionManager};

/// Startup window covers history, the current month and the horizon.
#[tokio::test]
async fn test_startup_window() {
    let ctx = TestContext::new().await;

    let partitions = ctx.store.partitions(EVENTS_TABLE);
    assert_eq!(partitions.len(), 15);

    let now = Utc::now();
    assert!(partitions.iter().any(|p| p.contains(now)));
    assert_eq!(partitions[0].start, add_months(month_start(now), -3));
}

/// Ensuring the future window twice leaves exactly one partition per month.
#[tokio::test]
async fn test_ensure_future_twice_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let manager = PartitionManager::new(store.clone(), PartitionConfig::default());

    manager.ensure_future_partitions(12).await.unwrap();
    let second = manager.ensure_future_partitions(12).await.unwrap();

    assert!(second.created.is_empty());
    assert!(!second.has_gaps());
    assert_eq!(store.partitions(EVENTS_TABLE).len(), 12);
}

/// Retirement never touches the partition that contains now.
#[tokio::test]
async fn test_retire_keeps_current_partition() {
    let ctx = TestContext::new().await;
    let now = Utc::now();
    let mut range = PartitionRange::containing(EVENTS_TABLE, add_months(now, -12));
    while range.start < month_start(now) {
        ctx.store.insert_partition(range.clone());
        range = range.next();
    }

    let report = ctx.partitions.retire_partitions_older_than(6).await.unwrap();
    assert_eq!(report.dropped.len(), 6);
    assert!(report.failed.is_empty());

    let remaining = ctx.store.partitions(EVENTS_TABLE);
    assert!(remaining.iter().any(|p| p.contains(now)));
    assert!(remaining.iter().all(|p| p.end > report.cutoff));
}

/// Events land once their month has a partition.
#[tokio::test]
async fn test_writes_require_partition() {
    let ctx = TestContext::with_options(TestOptions {
        ensure_partitions: false,
        ..TestOptions::default()
    })
    .await;

    ctx.buffer
        .enqueue(Event::pageview("site", "v", "s", "/"))
        .unwrap();
    let report = ctx.flush().await;
    assert!(matches!(report, buffer::FlushReport::Written { accepted: 0, rejected: 1, .. }));

    ctx.partitions.ensure_future_partitions(1).await.unwrap();
    ctx.buffer
        .enqueue(Event::pageview("site", "v", "s", "/"))
        .unwrap();
    let report = ctx.flush().await;
    assert!(matches!(report, buffer::FlushReport::Written { accepted: 1, rejected: 0, .. }));
}

/// The maintenance worker stops when signalled.
#[tokio::test]
async fn test_maintenance_worker_stops() {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(PartitionManager::new(store, PartitionConfig::default()));
    let worker = Arc::new(PartitionMaintenanceWorker::new(manager));

    let (tx, rx) = watch::channel(false);
    let handle = worker.clone().start(rx);

    let report = worker.run_once(Utc::now()).await;
    let future = report.future.expect("future pass ran");
    assert_eq!(future.created.len(), 12);
    assert_eq!(
        future.created[0].partition_id(),
        format!("{}{:02}", Utc::now().year(), Utc::now().month())
    );

    tx.send_replace(true);
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker stopped")
        .unwrap();
}
