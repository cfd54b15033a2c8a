//! Partition lifecycle manager.
//!
//! Keeps a rolling window of monthly partitions for a time-partitioned table:
//! future months are created ahead of time, recent past months are backfilled
//! for late events, and partitions past the retention period are dropped
//! whole instead of deleting rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use engine_core::{
    add_months, find_continuity_issues, month_start, ContinuityIssue, CreateOutcome,
    PartitionRange, PartitionStore, Result,
};
use telemetry::{health, metrics};
use tracing::{debug, error, info, warn};

use crate::config::PartitionConfig;

/// Outcome of an ensure pass over a window of months.
#[derive(Debug, Clone, Default)]
pub struct PartitionReport {
    pub created: Vec<PartitionRange>,
    pub existing: usize,
    /// Ranges whose creation failed, with the error message
    pub failed: Vec<(PartitionRange, String)>,
    /// Gaps and overlaps found in the window after creating
    pub issues: Vec<ContinuityIssue>,
}

impl PartitionReport {
    pub fn gaps(&self) -> impl Iterator<Item = &ContinuityIssue> {
        self.issues.iter().filter(|issue| issue.is_gap())
    }

    pub fn has_gaps(&self) -> bool {
        self.gaps().next().is_some()
    }
}

/// Outcome of a retirement pass.
#[derive(Debug, Clone)]
pub struct RetirementReport {
    /// Partitions ending at or before this instant are eligible
    pub cutoff: DateTime<Utc>,
    pub dropped: Vec<PartitionRange>,
    pub failed: Vec<(PartitionRange, String)>,
}

/// `YYYYMM` id of the oldest partition kept when retaining `months_to_keep`
/// months before the one containing `now`.
pub fn cutoff_partition_id(now: DateTime<Utc>, months_to_keep: u32) -> String {
    add_months(month_start(now), -(months_to_keep as i32))
        .format("%Y%m")
        .to_string()
}

/// Creates and retires the monthly partitions of one table.
pub struct PartitionManager {
    store: Arc<dyn PartitionStore>,
    config: PartitionConfig,
}

impl PartitionManager {
    pub fn new(store: Arc<dyn PartitionStore>, config: PartitionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    /// Creates the current month and the following `horizon - 1` months.
    pub async fn ensure_future_partitions(&self, horizon: u32) -> Result<PartitionReport> {
        self.ensure_future_partitions_at(Utc::now(), horizon).await
    }

    pub async fn ensure_future_partitions_at(
        &self,
        now: DateTime<Utc>,
        horizon: u32,
    ) -> Result<PartitionReport> {
        self.ensure_window(month_start(now), horizon).await
    }

    /// Creates the `months_back` months before the current one, never
    /// reaching past the retention cutoff.
    pub async fn ensure_historical_partitions(&self, months_back: u32) -> Result<PartitionReport> {
        self.ensure_historical_partitions_at(Utc::now(), months_back)
            .await
    }

    pub async fn ensure_historical_partitions_at(
        &self,
        now: DateTime<Utc>,
        months_back: u32,
    ) -> Result<PartitionReport> {
        let clamped = self.config.clamp_history(months_back);
        if clamped < months_back {
            warn!(
                table = %self.config.table,
                requested = months_back,
                retention_months = self.config.retention_months,
                "Historical window clamped to retention"
            );
        }
        let months_back = clamped;
        let start = add_months(month_start(now), -(months_back as i32));
        self.ensure_window(start, months_back).await
    }

    /// Creates `months` consecutive partitions from `start`, then checks the
    /// window for gaps and overlaps.
    ///
    /// Creation failures are recorded in the report; only the continuity
    /// query can fail the pass.
    async fn ensure_window(&self, start: DateTime<Utc>, months: u32) -> Result<PartitionReport> {
        let mut report = PartitionReport::default();
        if months == 0 {
            return Ok(report);
        }

        let mut range = PartitionRange::containing(self.table(), start);
        for _ in 0..months {
            match self.store.create_partition(&range).await {
                Ok(CreateOutcome::Created) => {
                    metrics().partitions.created.inc();
                    info!(partition = %range, "Created partition");
                    report.created.push(range.clone());
                }
                Ok(CreateOutcome::AlreadyExists) => {
                    debug!(partition = %range, "Partition already exists");
                    report.existing += 1;
                }
                Err(e) => {
                    metrics().partitions.errors.inc();
                    error!(partition = %range, error = %e, "Failed to create partition");
                    report.failed.push((range.clone(), e.to_string()));
                }
            }
            range = range.next();
        }

        let window_end = add_months(start, months as i32);
        let existing = self.store.query_partitions(self.table()).await?;
        report.issues = find_continuity_issues(&existing, start, window_end);

        let gaps = report.gaps().count();
        if gaps == 0 {
            health().partitions.mark_up();
        } else {
            health()
                .partitions
                .mark_down(format!("{} partition gap(s) in {}", gaps, self.table()));
        }

        for issue in &report.issues {
            match issue {
                ContinuityIssue::Gap { from, to } => {
                    metrics().partitions.gaps_detected.inc();
                    error!(table = self.table(), from = %from, to = %to, "Partition gap detected");
                }
                ContinuityIssue::Overlap { from, to } => {
                    warn!(table = self.table(), from = %from, to = %to, "Overlapping partitions detected");
                }
            }
        }

        Ok(report)
    }

    /// Drops partitions that ended at or before the start of the month
    /// `retention_months` before the current one.
    pub async fn retire_partitions_older_than(
        &self,
        retention_months: u32,
    ) -> Result<RetirementReport> {
        self.retire_partitions_older_than_at(Utc::now(), retention_months)
            .await
    }

    pub async fn retire_partitions_older_than_at(
        &self,
        now: DateTime<Utc>,
        retention_months: u32,
    ) -> Result<RetirementReport> {
        let current_month = month_start(now);
        let cutoff = add_months(current_month, -(retention_months as i32));

        info!(
            table = self.table(),
            cutoff_partition = %cutoff_partition_id(now, retention_months),
            retention_months = retention_months,
            "Enforcing partition retention"
        );

        let mut report = RetirementReport {
            cutoff,
            dropped: Vec::new(),
            failed: Vec::new(),
        };

        let candidates: Vec<PartitionRange> = self
            .store
            .query_partitions(self.table())
            .await?
            .into_iter()
            .filter(|p| p.end <= cutoff && p.start < current_month && !p.contains(now))
            .collect();

        if candidates.is_empty() {
            debug!(table = self.table(), "No partitions to drop");
            return Ok(report);
        }

        for range in candidates {
            match self.store.drop_partition(&range).await {
                Ok(()) => {
                    metrics().partitions.dropped.inc();
                    info!(partition = %range, "Dropped partition");
                    report.dropped.push(range);
                }
                Err(e) => {
                    metrics().partitions.errors.inc();
                    error!(partition = %range, error = %e, "Failed to drop partition");
                    report.failed.push((range, e.to_string()));
                }
            }
        }

        if !report.dropped.is_empty() {
            info!(
                table = self.table(),
                dropped_partitions = report.dropped.len(),
                failed = report.failed.len(),
                "Partition cleanup complete"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use engine_core::EVENTS_TABLE;
    use storage::MemoryStore;

    fn manager(store: &Arc<MemoryStore>) -> PartitionManager {
        PartitionManager::new(store.clone(), PartitionConfig::default())
    }

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cutoff_partition_id() {
        assert_eq!(cutoff_partition_id(at(2024, 1, 15), 3), "202310");
        assert_eq!(cutoff_partition_id(at(2024, 3, 15), 3), "202312");
        assert_eq!(cutoff_partition_id(at(2024, 1, 15), 1), "202312");
    }

    #[tokio::test]
    async fn test_ensure_future_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store);
        let now = at(2024, 11, 20);

        let first = manager.ensure_future_partitions_at(now, 12).await.unwrap();
        assert_eq!(first.created.len(), 12);
        assert!(first.issues.is_empty());

        let second = manager.ensure_future_partitions_at(now, 12).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.existing, 12);

        let partitions = store.partitions(EVENTS_TABLE);
        assert_eq!(partitions.len(), 12);
        assert_eq!(partitions[0].partition_id(), "202411");
        assert_eq!(partitions[11].partition_id(), "202510");
    }

    #[tokio::test]
    async fn test_historical_partitions_precede_current_month() {
        let store = Arc::new(MemoryStore::new());
        let report = manager(&store)
            .ensure_historical_partitions_at(at(2024, 2, 1), 3)
            .await
            .unwrap();

        let ids: Vec<String> = report.created.iter().map(|p| p.partition_id()).collect();
        assert_eq!(ids, vec!["202311", "202312", "202401"]);
    }

    #[tokio::test]
    async fn test_creation_failures_reported_as_gaps() {
        let store = Arc::new(MemoryStore::new());
        store.fail_partition_ops(true);

        let report = manager(&store)
            .ensure_future_partitions_at(at(2024, 5, 5), 3)
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 3);
        assert!(report.has_gaps());
    }

    #[tokio::test]
    async fn test_missing_month_detected_as_gap() {
        let store = Arc::new(MemoryStore::new());
        store.insert_partition(PartitionRange::monthly(EVENTS_TABLE, 2024, 5));
        store.insert_partition(PartitionRange::monthly(EVENTS_TABLE, 2024, 7));
        store.fail_partition_ops(true);

        let report = manager(&store)
            .ensure_future_partitions_at(at(2024, 5, 5), 3)
            .await
            .unwrap();
        let gaps: Vec<_> = report.gaps().collect();
        assert_eq!(gaps.len(), 1);
        assert_eq!(
            gaps[0],
            &ContinuityIssue::Gap {
                from: at(2024, 6, 1) - chrono::Duration::hours(12),
                to: at(2024, 7, 1) - chrono::Duration::hours(12),
            }
        );
    }

    #[tokio::test]
    async fn test_retire_keeps_current_and_recent_months() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store);
        let now = at(2024, 6, 15);
        let mut range = PartitionRange::monthly(EVENTS_TABLE, 2023, 6);
        while range.start < add_months(month_start(now), 3) {
            store.insert_partition(range.clone());
            range = range.next();
        }

        let report = manager.retire_partitions_older_than_at(now, 6).await.unwrap();
        assert_eq!(report.cutoff, add_months(month_start(now), -6));
        let dropped: Vec<String> = report.dropped.iter().map(|p| p.partition_id()).collect();
        assert_eq!(dropped.first().map(String::as_str), Some("202306"));
        assert_eq!(dropped.last().map(String::as_str), Some("202311"));

        let remaining = store.partitions(EVENTS_TABLE);
        assert!(remaining.iter().any(|p| p.contains(now)));
        assert_eq!(remaining[0].partition_id(), "202312");
    }

    #[tokio::test]
    async fn test_zero_retention_never_drops_current_month() {
        let store = Arc::new(MemoryStore::new());
        let now = at(2024, 6, 15);
        store.insert_partition(PartitionRange::containing(EVENTS_TABLE, now));
        store.insert_partition(PartitionRange::monthly(EVENTS_TABLE, 2024, 5));

        let report = manager(&store)
            .retire_partitions_older_than_at(now, 0)
            .await
            .unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(store.partitions(EVENTS_TABLE).len(), 1);
        assert!(store.partitions(EVENTS_TABLE)[0].contains(now));
    }

    #[tokio::test]
    async fn test_drop_failure_does_not_block_others() {
        let store = Arc::new(MemoryStore::new());
        for month in 1..=4 {
            store.insert_partition(PartitionRange::monthly(EVENTS_TABLE, 2023, month));
        }
        store.fail_drop_of("202302");

        let report = manager(&store)
            .retire_partitions_older_than_at(at(2024, 6, 15), 6)
            .await
            .unwrap();
        assert_eq!(report.dropped.len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.partition_id(), "202302");
    }
}
