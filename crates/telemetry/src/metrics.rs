//! Internal metrics collection.
//!
//! Lock-free atomics so hot paths (enqueue, flush, matching) never block
//! on instrumentation. Metrics are grouped by the subsystem that owns them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Bucket bounds for in-process work such as request handling.
pub const FAST_BUCKETS_MS: &[u64] = &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1000];

/// Bucket bounds for work that crosses the network.
pub const IO_BUCKETS_MS: &[u64] = &[5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000, 30000];

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last written value.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Millisecond histogram with fixed upper bounds and an overflow bucket.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [u64],
    /// One per bound, plus the overflow bucket
    buckets: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn with_bounds(bounds: &'static [u64]) -> Self {
        Self {
            bounds,
            buckets: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let index = self.bounds.partition_point(|&bound| bound < ms);
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / count as f64
        }
    }

    /// Upper bound of the bucket holding the `q` quantile.
    ///
    /// Observations past the last bound report that bound.
    pub fn quantile(&self, q: f64) -> u64 {
        let count = self.count();
        if count == 0 {
            return 0;
        }

        let target = ((count as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (i, bucket) in self.buckets.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target {
                return self.bound(i);
            }
        }
        self.bound(self.bounds.len())
    }

    fn bound(&self, index: usize) -> u64 {
        self.bounds
            .get(index)
            .or(self.bounds.last())
            .copied()
            .unwrap_or(0)
    }

    fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            mean_ms: self.mean(),
            p50_ms: self.quantile(0.5),
            p99_ms: self.quantile(0.99),
        }
    }
}

/// HTTP ingestion boundary.
#[derive(Debug)]
pub struct IngestMetrics {
    pub requests: Counter,
    pub events_received: Counter,
    pub events_invalid: Counter,
    pub quota_denied: Counter,
    pub quota_unknown: Counter,
    /// Enqueues refused because the buffer was full
    pub backpressure_rejections: Counter,
    pub latency_ms: Histogram,
}

#[derive(Debug)]
pub struct BufferMetrics {
    pub events_enqueued: Counter,
    pub flushes: Counter,
    pub events_flushed: Counter,
    pub retries: Counter,
    pub batches_dropped: Counter,
    pub events_dropped: Counter,
    pub rows_rejected: Counter,
    /// Subset of `rows_rejected` with no covering partition
    pub gap_rejections: Counter,
    /// Batches the observers never saw because their queue was full
    pub observer_batches_skipped: Counter,
    pub flush_latency_ms: Histogram,
    pub depth: Gauge,
    pub closed: Gauge,
}

#[derive(Debug)]
pub struct StorageMetrics {
    pub writes: Counter,
    pub write_errors: Counter,
    pub write_latency_ms: Histogram,
}

#[derive(Debug, Default)]
pub struct FunnelMetrics {
    pub events_processed: Counter,
    pub starts: Counter,
    pub advances: Counter,
    pub conversions: Counter,
    pub lookup_failures: Counter,
    pub invalid_definitions: Counter,
    pub sink_errors: Counter,
}

#[derive(Debug, Default)]
pub struct PartitionMetrics {
    pub created: Counter,
    pub dropped: Counter,
    pub gaps_detected: Counter,
    pub errors: Counter,
}

/// Collected metrics for the clickstream engine.
#[derive(Debug)]
pub struct Metrics {
    pub ingest: IngestMetrics,
    pub buffer: BufferMetrics,
    pub storage: StorageMetrics,
    pub funnels: FunnelMetrics,
    pub partitions: PartitionMetrics,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ingest: IngestMetrics {
                requests: Counter::default(),
                events_received: Counter::default(),
                events_invalid: Counter::default(),
                quota_denied: Counter::default(),
                quota_unknown: Counter::default(),
                backpressure_rejections: Counter::default(),
                latency_ms: Histogram::with_bounds(FAST_BUCKETS_MS),
            },
            buffer: BufferMetrics {
                events_enqueued: Counter::default(),
                flushes: Counter::default(),
                events_flushed: Counter::default(),
                retries: Counter::default(),
                batches_dropped: Counter::default(),
                events_dropped: Counter::default(),
                rows_rejected: Counter::default(),
                gap_rejections: Counter::default(),
                observer_batches_skipped: Counter::default(),
                flush_latency_ms: Histogram::with_bounds(IO_BUCKETS_MS),
                depth: Gauge::default(),
                closed: Gauge::default(),
            },
            storage: StorageMetrics {
                writes: Counter::default(),
                write_errors: Counter::default(),
                write_latency_ms: Histogram::with_bounds(IO_BUCKETS_MS),
            },
            funnels: FunnelMetrics::default(),
            partitions: PartitionMetrics::default(),
        }
    }

    /// Point-in-time copy for logging and health output.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            events_received: self.ingest.events_received.get(),
            events_invalid: self.ingest.events_invalid.get(),
            quota_denied: self.ingest.quota_denied.get(),
            backpressure_rejections: self.ingest.backpressure_rejections.get(),
            events_flushed: self.buffer.events_flushed.get(),
            flush_retries: self.buffer.retries.get(),
            events_dropped: self.buffer.events_dropped.get(),
            rows_rejected: self.buffer.rows_rejected.get(),
            buffer_depth: self.buffer.depth.get(),
            buffer_closed: self.buffer.closed.get() > 0,
            funnel_starts: self.funnels.starts.get(),
            funnel_conversions: self.funnels.conversions.get(),
            partition_gaps_detected: self.partitions.gaps_detected.get(),
            ingest_latency: self.ingest.latency_ms.summary(),
            flush_latency: self.buffer.flush_latency_ms.summary(),
            storage_latency: self.storage.write_latency_ms.summary(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub events_received: u64,
    pub events_invalid: u64,
    pub quota_denied: u64,
    pub backpressure_rejections: u64,
    pub events_flushed: u64,
    pub flush_retries: u64,
    pub events_dropped: u64,
    pub rows_rejected: u64,
    pub buffer_depth: u64,
    pub buffer_closed: bool,
    pub funnel_starts: u64,
    pub funnel_conversions: u64,
    pub partition_gaps_detected: u64,
    pub ingest_latency: LatencySummary,
    pub flush_latency: LatencySummary,
    pub storage_latency: LatencySummary,
}

static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observations_land_in_first_covering_bucket() {
        let hist = Histogram::with_bounds(&[10, 100]);
        hist.observe(10);
        hist.observe(11);
        hist.observe(5_000);

        let counts: Vec<u64> = hist.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        assert_eq!(counts, vec![1, 1, 1]);
        assert_eq!(hist.count(), 3);
    }

    #[test]
    fn test_quantiles_report_bucket_bounds() {
        let hist = Histogram::with_bounds(FAST_BUCKETS_MS);
        assert_eq!(hist.quantile(0.99), 0);

        for _ in 0..98 {
            hist.observe(3);
        }
        hist.observe(40);
        hist.observe(60_000);

        assert_eq!(hist.quantile(0.5), 5);
        assert_eq!(hist.quantile(0.99), 50);
        assert_eq!(hist.quantile(1.0), 1000);
    }
}
