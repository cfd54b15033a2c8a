//! ClickHouse implementation of the storage ports.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use clickhouse::Row;
use engine_core::{
    CreateOutcome, Error, Event, EventStore, FunnelAnalyticsIncrement, FunnelAnalyticsSink,
    FunnelDefinitionStore, FunnelEventRow, FunnelProgress, FunnelProgressRepository,
    FunnelRecord, PartitionRange, PartitionStore, Result, RowRejection, WriteOutcome,
    EVENTS_TABLE,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use telemetry::metrics;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::client::ClickHouseClient;
use crate::enrichment::UserAgentEnricher;
use crate::funnels::{
    group_funnel_rows, FunnelAnalyticsRow, FunnelEventTableRow, FunnelProgressRow,
    FunnelStepJoinRow,
};
use crate::insert::{insert_rows, EventRow};

const PARTITIONS_TABLE: &str = "event_partitions";

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
struct PartitionRow {
    table_name: String,
    partition_id: String,
    range_start: u32, // DateTime as Unix seconds
    range_end: u32,
    is_dropped: u8,
    updated_at: i64,
}

impl PartitionRow {
    fn new(range: &PartitionRange, dropped: bool) -> Self {
        Self {
            table_name: range.table.clone(),
            partition_id: range.partition_id(),
            range_start: range.start.timestamp().max(0) as u32,
            range_end: range.end.timestamp().max(0) as u32,
            is_dropped: u8::from(dropped),
            updated_at: Utc::now().timestamp_millis(),
        }
    }

    /// A row replacing `self` under `ReplacingMergeTree(updated_at)`, even
    /// when written within the same millisecond.
    fn superseded_by(&self, dropped: bool) -> Self {
        Self {
            is_dropped: u8::from(dropped),
            updated_at: Utc::now().timestamp_millis().max(self.updated_at + 1),
            ..self.clone()
        }
    }

    fn into_range(self) -> PartitionRange {
        PartitionRange {
            table: self.table_name,
            start: Utc.timestamp_opt(self.range_start as i64, 0).single().unwrap_or_default(),
            end: Utc.timestamp_opt(self.range_end as i64, 0).single().unwrap_or_default(),
        }
    }
}

struct CachedPartitions {
    loaded_at: Instant,
    ranges: Vec<PartitionRange>,
}

/// Storage backend on ClickHouse.
///
/// Partition coverage for writes is checked against the registry table,
/// cached for `partition_cache_secs`.
pub struct ClickHouseStore {
    client: Arc<ClickHouseClient>,
    enricher: UserAgentEnricher,
    partition_cache: RwLock<Option<CachedPartitions>>,
    partition_cache_ttl: Duration,
}

impl ClickHouseStore {
    pub fn new(client: Arc<ClickHouseClient>) -> Self {
        let partition_cache_ttl = Duration::from_secs(client.config().partition_cache_secs);
        Self {
            client,
            enricher: UserAgentEnricher::new(),
            partition_cache: RwLock::new(None),
            partition_cache_ttl,
        }
    }

    pub fn client(&self) -> &ClickHouseClient {
        &self.client
    }

    async fn event_partitions(&self) -> Result<Vec<PartitionRange>> {
        {
            let cache = self.partition_cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < self.partition_cache_ttl {
                    return Ok(cached.ranges.clone());
                }
            }
        }

        let ranges = self.query_partitions(EVENTS_TABLE).await?;
        *self.partition_cache.write() = Some(CachedPartitions {
            loaded_at: Instant::now(),
            ranges: ranges.clone(),
        });
        Ok(ranges)
    }

    fn invalidate_partitions(&self) {
        *self.partition_cache.write() = None;
    }
}

#[async_trait]
impl EventStore for ClickHouseStore {
    async fn write_batch(&self, events: &[Event]) -> Result<WriteOutcome> {
        let partitions = self.event_partitions().await?;

        let mut rows = Vec::with_capacity(events.len());
        let mut rejected = Vec::new();
        for (index, event) in events.iter().enumerate() {
            if partitions.iter().any(|p| p.contains(event.timestamp)) {
                rows.push(EventRow::from_event(event, &self.enricher));
            } else {
                rejected.push(RowRejection {
                    index,
                    event_id: event.id,
                    error: Error::partition_gap(EVENTS_TABLE, event.timestamp),
                });
            }
        }

        let accepted = insert_rows(&self.client, EVENTS_TABLE, &rows).await?;
        Ok(WriteOutcome { accepted, rejected })
    }
}

#[async_trait]
impl PartitionStore for ClickHouseStore {
    async fn query_partitions(&self, table: &str) -> Result<Vec<PartitionRange>> {
        let sql = format!(
            "SELECT ?fields FROM {} FINAL WHERE table_name = ? AND is_dropped = 0 ORDER BY range_start",
            self.client.qualified(PARTITIONS_TABLE)?
        );

        let rows: Vec<PartitionRow> = self
            .client
            .inner()
            .query(&sql)
            .bind(table)
            .fetch_all()
            .await
            .map_err(|e| Error::storage(format!("query partitions of {}: {}", table, e)))?;

        Ok(rows.into_iter().map(PartitionRow::into_range).collect())
    }

    async fn create_partition(&self, range: &PartitionRange) -> Result<CreateOutcome> {
        let existing = self.query_partitions(&range.table).await?;
        if existing.iter().any(|p| p == range) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        insert_rows(
            &self.client,
            PARTITIONS_TABLE,
            &[PartitionRow::new(range, false)],
        )
        .await?;
        self.invalidate_partitions();

        info!(partition = %range, "Registered partition");
        Ok(CreateOutcome::Created)
    }

    /// Tombstones the month before dropping it, so no writer sees it as
    /// writable once the physical partition is gone. A failed drop restores
    /// the registration so the next retirement pass retries it.
    async fn drop_partition(&self, range: &PartitionRange) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} DROP PARTITION ID '{}'",
            self.client.qualified(&range.table)?,
            range.partition_id()
        );

        let tombstone = PartitionRow::new(range, true);
        insert_rows(&self.client, PARTITIONS_TABLE, std::slice::from_ref(&tombstone)).await?;
        self.invalidate_partitions();

        let Err(e) = self.client.inner().query(&sql).execute().await else {
            info!(partition = %range, "Dropped partition");
            return Ok(());
        };
        let err = Error::storage(format!("drop partition {}: {}", range, e));

        match insert_rows(
            &self.client,
            PARTITIONS_TABLE,
            &[tombstone.superseded_by(false)],
        )
        .await
        {
            Ok(_) => {
                self.invalidate_partitions();
                warn!(partition = %range, error = %err, "Partition drop failed; registration restored");
            }
            Err(restore) => {
                error!(
                    partition = %range,
                    error = %err,
                    restore_error = %restore,
                    "Partition drop failed and registration was not restored; month rejects writes until re-registered"
                );
            }
        }
        Err(err)
    }
}

#[async_trait]
impl FunnelDefinitionStore for ClickHouseStore {
    async fn list_active_funnels(&self, website_id: &str) -> Result<Vec<FunnelRecord>> {
        let sql = format!(
            r#"
            SELECT
                f.id AS funnel_id,
                f.name AS funnel_name,
                s.id AS step_id,
                s.name AS step_name,
                s.step_type,
                s.step_order,
                s.page_path,
                s.event_name,
                s.property_key,
                s.property_value
            FROM {funnels} AS f FINAL
            INNER JOIN (SELECT * FROM {steps} FINAL) AS s ON s.funnel_id = f.id
            WHERE f.website_id = ? AND f.active = 1
            ORDER BY f.id, s.step_order
            "#,
            funnels = self.client.qualified("funnels")?,
            steps = self.client.qualified("funnel_steps")?,
        );

        let rows: Vec<FunnelStepJoinRow> = self
            .client
            .inner()
            .query(&sql)
            .bind(website_id)
            .fetch_all()
            .await
            .map_err(|e| Error::funnel_lookup(format!("website {}: {}", website_id, e)))?;

        let (records, errors) = group_funnel_rows(website_id, rows);
        for err in errors {
            metrics().funnels.invalid_definitions.inc();
            warn!(
                website_id = website_id,
                funnel_id = %err.funnel_id,
                reason = %err.reason,
                "Skipping unreadable funnel"
            );
        }
        Ok(records)
    }
}

#[async_trait]
impl FunnelProgressRepository for ClickHouseStore {
    async fn load_progress(
        &self,
        website_id: &str,
        funnel_id: Uuid,
        visitor_id: &str,
    ) -> Result<Option<FunnelProgress>> {
        let sql = format!(
            "SELECT ?fields FROM {} FINAL WHERE website_id = ? AND funnel_id = ? AND visitor_id = ? LIMIT 1",
            self.client.qualified("funnel_progress")?
        );

        let row: Option<FunnelProgressRow> = self
            .client
            .inner()
            .query(&sql)
            .bind(website_id)
            .bind(funnel_id.to_string())
            .bind(visitor_id)
            .fetch_optional()
            .await
            .map_err(|e| Error::storage(format!("load funnel progress: {}", e)))?;

        row.map(FunnelProgress::try_from)
            .transpose()
            .map_err(Error::internal)
    }

    async fn save_progress(&self, progress: &FunnelProgress) -> Result<()> {
        insert_rows(
            &self.client,
            "funnel_progress",
            &[FunnelProgressRow::from(progress)],
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl FunnelAnalyticsSink for ClickHouseStore {
    async fn record_steps(&self, rows: &[FunnelEventRow]) -> Result<()> {
        let rows: Vec<FunnelEventTableRow> = rows.iter().map(FunnelEventTableRow::from).collect();
        insert_rows(&self.client, "funnel_events", &rows).await.map(|_| ())
    }

    async fn increment(&self, increments: &[FunnelAnalyticsIncrement]) -> Result<()> {
        let rows: Vec<FunnelAnalyticsRow> =
            increments.iter().map(FunnelAnalyticsRow::from).collect();
        insert_rows(&self.client, "funnel_analytics", &rows).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restored_registration_outranks_tombstone() {
        let range = PartitionRange::monthly(EVENTS_TABLE, 2024, 1);
        let mut tombstone = PartitionRow::new(&range, true);
        tombstone.updated_at = Utc::now().timestamp_millis() + 60_000;

        let restored = tombstone.superseded_by(false);
        assert_eq!(restored.is_dropped, 0);
        assert!(restored.updated_at > tombstone.updated_at);
        assert_eq!(restored.partition_id, "202401");
        assert_eq!(restored.range_start, tombstone.range_start);
    }
}
