//! Funnel matcher configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Funnel matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelConfig {
    /// How long compiled definitions are reused before re-reading the store
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Websites with cached definitions
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    /// Visitor progress entries held in memory
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: u64,
    /// Progress untouched this long is dropped from memory
    #[serde(default = "default_progress_idle_ms")]
    pub progress_idle_ms: u64,
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_progress_capacity() -> u64 {
    1_000_000
}

fn default_progress_idle_ms() -> u64 {
    30 * 60 * 1000
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            progress_capacity: default_progress_capacity(),
            progress_idle_ms: default_progress_idle_ms(),
        }
    }
}

impl FunnelConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn progress_idle(&self) -> Duration {
        Duration::from_millis(self.progress_idle_ms)
    }
}
