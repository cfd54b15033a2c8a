//! Storage-facing traits.
//!
//! The buffer, funnel matcher and partition manager only talk to storage
//! through these. `storage` provides a ClickHouse and an in-memory
//! implementation of each.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::Event;
use crate::funnel::{FunnelAnalyticsIncrement, FunnelEventRow, FunnelProgress, FunnelRecord};
use crate::partition::{CreateOutcome, PartitionRange};

/// A row the store refused while accepting the rest of the batch.
#[derive(Debug)]
pub struct RowRejection {
    /// Position of the row in the submitted batch
    pub index: usize,
    pub event_id: Uuid,
    pub error: Error,
}

/// Outcome of a batch write that reached the store.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub accepted: usize,
    pub rejected: Vec<RowRejection>,
}

impl WriteOutcome {
    pub fn all_accepted(count: usize) -> Self {
        Self {
            accepted: count,
            rejected: Vec::new(),
        }
    }
}

/// Append-only sink for events.
///
/// An `Err` means the whole batch failed and may be retried; per-row
/// problems are reported in [`WriteOutcome::rejected`].
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn write_batch(&self, events: &[Event]) -> Result<WriteOutcome>;
}

#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Live partitions of `table`, in no particular order.
    async fn query_partitions(&self, table: &str) -> Result<Vec<PartitionRange>>;

    async fn create_partition(&self, range: &PartitionRange) -> Result<CreateOutcome>;

    async fn drop_partition(&self, range: &PartitionRange) -> Result<()>;
}

#[async_trait]
pub trait FunnelDefinitionStore: Send + Sync {
    async fn list_active_funnels(&self, website_id: &str) -> Result<Vec<FunnelRecord>>;
}

/// Durable copy of funnel progress, read on cache miss and upserted on change.
#[async_trait]
pub trait FunnelProgressRepository: Send + Sync {
    async fn load_progress(
        &self,
        website_id: &str,
        funnel_id: Uuid,
        visitor_id: &str,
    ) -> Result<Option<FunnelProgress>>;

    async fn save_progress(&self, progress: &FunnelProgress) -> Result<()>;
}

#[async_trait]
pub trait FunnelAnalyticsSink: Send + Sync {
    async fn record_steps(&self, rows: &[FunnelEventRow]) -> Result<()>;

    async fn increment(&self, increments: &[FunnelAnalyticsIncrement]) -> Result<()>;
}

/// Sees every flushed batch, in flush order, after the storage write.
#[async_trait]
pub trait BatchObserver: Send + Sync {
    async fn observe(&self, events: &[Event]);
}
