//! Common test setup functions.

use std::sync::Arc;

use api::{router, state::AppState};
use axum::Router;
use buffer::{BufferConfig, EventBuffer, FlushReport};
use engine_core::UnknownQuotaPolicy;
use funnel::{FunnelConfig, FunnelMatcher};
use storage::MemoryStore;
use worker::{PartitionConfig, PartitionManager};

use crate::mocks::MockQuota;

/// Knobs for [`TestContext::with_options`].
pub struct TestOptions {
    pub buffer: BufferConfig,
    pub unknown_quota_policy: UnknownQuotaPolicy,
    /// Create the default partition window before serving
    pub ensure_partitions: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            // Tests drive flushes explicitly.
            buffer: BufferConfig {
                flush_interval_ms: 3_600_000,
                retry_initial_backoff_ms: 1,
                retry_max_backoff_ms: 5,
                ..BufferConfig::default()
            },
            unknown_quota_policy: UnknownQuotaPolicy::Allow,
            ensure_partitions: true,
        }
    }
}

/// Test context wiring the production components over in-memory storage.
///
/// - The real Axum router with all layers
/// - `MemoryStore::partitioned()` so rows outside partitions are rejected
/// - The funnel matcher registered as the buffer's observer
/// - `MockQuota` standing in for the subscription service
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub buffer: Arc<EventBuffer>,
    pub matcher: Arc<FunnelMatcher>,
    pub partitions: Arc<PartitionManager>,
    pub quota: Arc<MockQuota>,
    pub router: Router,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_options(TestOptions::default()).await
    }

    pub async fn with_options(options: TestOptions) -> Self {
        telemetry::init_test_tracing();

        let store = Arc::new(MemoryStore::partitioned());

        let partitions = Arc::new(PartitionManager::new(
            store.clone(),
            PartitionConfig::default(),
        ));
        if options.ensure_partitions {
            let config = partitions.config().clone();
            partitions
                .ensure_future_partitions(config.future_months)
                .await
                .expect("Failed to create future partitions");
            partitions
                .ensure_historical_partitions(config.history_months)
                .await
                .expect("Failed to create historical partitions");
        }

        let matcher = Arc::new(FunnelMatcher::new(
            &FunnelConfig::default(),
            store.clone(),
            store.clone(),
            store.clone(),
        ));

        let buffer = Arc::new(
            EventBuffer::new(options.buffer, store.clone()).with_observer(matcher.clone()),
        );

        let quota = Arc::new(MockQuota::new());
        let state = AppState::new(buffer.clone(), quota.clone(), options.unknown_quota_policy);
        let router = router(state);

        Self {
            store,
            buffer,
            matcher,
            partitions,
            quota,
            router,
        }
    }

    /// Flushes everything pending, as the timer loop would, and waits for the funnel matcher to see the batch.
    pub async fn flush(&self) -> FlushReport {
        let report = self.buffer.flush().await;
        self.buffer.observers_settled().await;
        report
    }
}
