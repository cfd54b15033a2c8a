//! Application state shared across handlers.

use std::sync::Arc;

use buffer::EventBuffer;
use engine_core::{QuotaChecker, QuotaDecision, UnknownQuotaPolicy};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub buffer: Arc<EventBuffer>,
    /// Subscription service (HTTP client in production, mock in tests)
    pub quota: Arc<dyn QuotaChecker>,
    pub unknown_quota_policy: UnknownQuotaPolicy,
}

impl AppState {
    pub fn new(
        buffer: Arc<EventBuffer>,
        quota: Arc<dyn QuotaChecker>,
        unknown_quota_policy: UnknownQuotaPolicy,
    ) -> Self {
        Self {
            buffer,
            quota,
            unknown_quota_policy,
        }
    }

    /// Asks the quota service and resolves `Unknown` by policy.
    pub async fn quota_allows(&self, website_id: &str) -> (bool, QuotaDecision) {
        let decision = self.quota.check(website_id).await;
        (self.unknown_quota_policy.permits(&decision), decision)
    }
}
