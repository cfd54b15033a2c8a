//! In-memory storage backend.
//!
//! Used by the `memory` storage mode and by tests. Writes, lookups and
//! partition operations can be made to fail on demand.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use engine_core::{
    CreateOutcome, Error, Event, EventStore, FunnelAnalyticsIncrement, FunnelAnalyticsSink,
    FunnelDefinitionStore, FunnelEventRow, FunnelProgress, FunnelProgressRepository,
    FunnelRecord, PartitionRange, PartitionStore, Result, RowRejection, WriteOutcome,
    EVENTS_TABLE,
};
use parking_lot::Mutex;
use uuid::Uuid;

type ProgressKey = (String, Uuid, String);

#[derive(Default)]
struct MemoryState {
    events: Vec<Event>,
    partitions: BTreeMap<String, BTreeSet<PartitionRange>>,
    funnels: HashMap<String, Vec<FunnelRecord>>,
    progress: HashMap<ProgressKey, FunnelProgress>,
    step_rows: Vec<FunnelEventRow>,
    increments: Vec<FunnelAnalyticsIncrement>,
}

/// Storage backend that keeps everything in process memory.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    enforce_partitions: bool,
    fail_writes: AtomicUsize,
    write_attempts: AtomicUsize,
    write_delay_ms: AtomicUsize,
    fail_funnel_lookups: AtomicBool,
    funnel_lookups: AtomicUsize,
    fail_partition_ops: AtomicBool,
    fail_drops: Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    /// Store that accepts events of any timestamp.
    pub fn new() -> Self {
        Self::with_enforcement(false)
    }

    /// Store that rejects events no registered partition covers.
    pub fn partitioned() -> Self {
        Self::with_enforcement(true)
    }

    fn with_enforcement(enforce_partitions: bool) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            enforce_partitions,
            fail_writes: AtomicUsize::new(0),
            write_attempts: AtomicUsize::new(0),
            write_delay_ms: AtomicUsize::new(0),
            fail_funnel_lookups: AtomicBool::new(false),
            funnel_lookups: AtomicUsize::new(0),
            fail_partition_ops: AtomicBool::new(false),
            fail_drops: Mutex::new(BTreeSet::new()),
        }
    }

    // === Failure injection ===

    /// The next `n` batch writes fail as a whole (`usize::MAX` for always).
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Every batch write sleeps this long before completing.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn fail_funnel_lookups(&self, fail: bool) {
        self.fail_funnel_lookups.store(fail, Ordering::SeqCst);
    }

    /// Creates and drops fail while set.
    pub fn fail_partition_ops(&self, fail: bool) {
        self.fail_partition_ops.store(fail, Ordering::SeqCst);
    }

    /// Dropping the partition with this id fails.
    pub fn fail_drop_of(&self, partition_id: impl Into<String>) {
        self.fail_drops.lock().insert(partition_id.into());
    }

    // === Seeding ===

    pub fn add_funnel(&self, funnel: FunnelRecord) {
        self.state
            .lock()
            .funnels
            .entry(funnel.website_id.clone())
            .or_default()
            .push(funnel);
    }

    /// Registers a partition without going through `create_partition`.
    pub fn insert_partition(&self, range: PartitionRange) {
        self.state
            .lock()
            .partitions
            .entry(range.table.clone())
            .or_default()
            .insert(range);
    }

    // === Inspection ===

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn funnel_lookups(&self) -> usize {
        self.funnel_lookups.load(Ordering::SeqCst)
    }

    pub fn partitions(&self, table: &str) -> Vec<PartitionRange> {
        self.state
            .lock()
            .partitions
            .get(table)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn progress(
        &self,
        website_id: &str,
        funnel_id: Uuid,
        visitor_id: &str,
    ) -> Option<FunnelProgress> {
        self.state
            .lock()
            .progress
            .get(&(website_id.to_string(), funnel_id, visitor_id.to_string()))
            .cloned()
    }

    pub fn step_rows(&self) -> Vec<FunnelEventRow> {
        self.state.lock().step_rows.clone()
    }

    /// Summed `(starts, conversions, time_to_convert_ms)` for a funnel.
    pub fn analytics_totals(&self, funnel_id: Uuid) -> (u64, u64, u64) {
        self.state
            .lock()
            .increments
            .iter()
            .filter(|inc| inc.funnel_id == funnel_id)
            .fold((0, 0, 0), |(s, c, t), inc| {
                (s + inc.starts, c + inc.conversions, t + inc.time_to_convert_ms)
            })
    }

    fn take_write_failure(&self) -> bool {
        self.fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }

    fn check_partition_ops(&self) -> Result<()> {
        if self.fail_partition_ops.load(Ordering::SeqCst) {
            return Err(Error::storage("partition operation failed (injected)"));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn write_batch(&self, events: &[Event]) -> Result<WriteOutcome> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        if self.take_write_failure() {
            return Err(Error::storage("write failed (injected)"));
        }

        let mut state = self.state.lock();
        let mut outcome = WriteOutcome::default();
        for (index, event) in events.iter().enumerate() {
            let covered = !self.enforce_partitions
                || state
                    .partitions
                    .get(EVENTS_TABLE)
                    .is_some_and(|set| set.iter().any(|p| p.contains(event.timestamp)));

            if covered {
                state.events.push(event.clone());
                outcome.accepted += 1;
            } else {
                outcome.rejected.push(RowRejection {
                    index,
                    event_id: event.id,
                    error: Error::partition_gap(EVENTS_TABLE, event.timestamp),
                });
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl PartitionStore for MemoryStore {
    async fn query_partitions(&self, table: &str) -> Result<Vec<PartitionRange>> {
        Ok(self.partitions(table))
    }

    async fn create_partition(&self, range: &PartitionRange) -> Result<CreateOutcome> {
        self.check_partition_ops()?;
        let mut state = self.state.lock();
        let created = state
            .partitions
            .entry(range.table.clone())
            .or_default()
            .insert(range.clone());
        Ok(if created {
            CreateOutcome::Created
        } else {
            CreateOutcome::AlreadyExists
        })
    }

    async fn drop_partition(&self, range: &PartitionRange) -> Result<()> {
        self.check_partition_ops()?;
        if self.fail_drops.lock().contains(&range.partition_id()) {
            return Err(Error::storage(format!("drop of {} failed (injected)", range)));
        }

        let mut state = self.state.lock();
        if let Some(set) = state.partitions.get_mut(&range.table) {
            set.remove(range);
        }
        if range.table == EVENTS_TABLE {
            state.events.retain(|e| !range.contains(e.timestamp));
        }
        Ok(())
    }
}

#[async_trait]
impl FunnelDefinitionStore for MemoryStore {
    async fn list_active_funnels(&self, website_id: &str) -> Result<Vec<FunnelRecord>> {
        self.funnel_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_funnel_lookups.load(Ordering::SeqCst) {
            return Err(Error::funnel_lookup("definition store unavailable (injected)"));
        }

        Ok(self
            .state
            .lock()
            .funnels
            .get(website_id)
            .map(|funnels| funnels.iter().filter(|f| f.active).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl FunnelProgressRepository for MemoryStore {
    async fn load_progress(
        &self,
        website_id: &str,
        funnel_id: Uuid,
        visitor_id: &str,
    ) -> Result<Option<FunnelProgress>> {
        Ok(self.progress(website_id, funnel_id, visitor_id))
    }

    async fn save_progress(&self, progress: &FunnelProgress) -> Result<()> {
        let key = (
            progress.website_id.clone(),
            progress.funnel_id,
            progress.visitor_id.clone(),
        );
        self.state.lock().progress.insert(key, progress.clone());
        Ok(())
    }
}

#[async_trait]
impl FunnelAnalyticsSink for MemoryStore {
    async fn record_steps(&self, rows: &[FunnelEventRow]) -> Result<()> {
        self.state.lock().step_rows.extend_from_slice(rows);
        Ok(())
    }

    async fn increment(&self, increments: &[FunnelAnalyticsIncrement]) -> Result<()> {
        self.state.lock().increments.extend_from_slice(increments);
        Ok(())
    }
}
