//! Event buffer configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Event buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Pending count that triggers an early flush
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    /// Pending count above which enqueues are refused
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// Timer flush interval in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Retries after the first failed write of a batch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,
    /// Deadline for the final flush on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Flushed batches that may wait for the observers
    #[serde(default = "default_observer_queue_batches")]
    pub observer_queue_batches: usize,
}

fn default_flush_threshold() -> usize {
    500
}

fn default_max_pending() -> usize {
    10_000
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_backoff_ms() -> u64 {
    100
}

fn default_retry_max_backoff_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_secs() -> u64 {
    15
}

fn default_observer_queue_batches() -> usize {
    256
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
            max_pending: default_max_pending(),
            flush_interval_ms: default_flush_interval_ms(),
            max_retries: default_max_retries(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            observer_queue_batches: default_observer_queue_batches(),
        }
    }
}

impl BufferConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Delay before retry number `retry` (1-based): `initial * 2^(retry-1)`,
    /// capped at the configured maximum.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32);
        let ms = self
            .retry_initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_backoff_ms);
        Duration::from_millis(ms)
    }
}
