//! Subscription quota decisions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Answer from the subscription service for one website.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Denied { reason: String },
    /// The service could not be reached or gave no usable answer.
    Unknown,
}

/// What to do with `Unknown` decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownQuotaPolicy {
    /// Fail open
    #[default]
    Allow,
    Deny,
}

impl UnknownQuotaPolicy {
    /// Collapses a decision into allow (`true`) or deny.
    pub fn permits(&self, decision: &QuotaDecision) -> bool {
        match decision {
            QuotaDecision::Allowed => true,
            QuotaDecision::Denied { .. } => false,
            QuotaDecision::Unknown => matches!(self, Self::Allow),
        }
    }
}

#[async_trait]
pub trait QuotaChecker: Send + Sync {
    async fn check(&self, website_id: &str) -> QuotaDecision;
}
