//! Mock implementations for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use engine_core::{QuotaChecker, QuotaDecision};
use parking_lot::Mutex;

/// Quota service stand-in. Websites without an explicit decision are
/// allowed.
#[derive(Default)]
pub struct MockQuota {
    decisions: Mutex<HashMap<String, QuotaDecision>>,
    calls: AtomicUsize,
}

impl MockQuota {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, website_id: &str, decision: QuotaDecision) {
        self.decisions.lock().insert(website_id.to_string(), decision);
    }

    pub fn deny(&self, website_id: &str, reason: &str) {
        self.set(
            website_id,
            QuotaDecision::Denied {
                reason: reason.to_string(),
            },
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuotaChecker for MockQuota {
    async fn check(&self, website_id: &str) -> QuotaDecision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.decisions
            .lock()
            .get(website_id)
            .cloned()
            .unwrap_or(QuotaDecision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_quota_defaults_to_allowed() {
        let quota = MockQuota::new();
        quota.deny("blocked", "over limit");

        assert_eq!(quota.check("open").await, QuotaDecision::Allowed);
        assert!(matches!(quota.check("blocked").await, QuotaDecision::Denied { .. }));
        assert_eq!(quota.calls(), 2);
    }
}
