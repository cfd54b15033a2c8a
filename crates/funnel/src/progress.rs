//! Bounded in-memory progress store.
//!
//! Entries idle past the configured time, or pushed out by capacity, are
//! dropped; the repository stays authoritative and is read again on the
//! next miss.

use std::sync::Arc;
use std::time::Duration;

use engine_core::FunnelProgress;
use moka::future::Cache;
use parking_lot::Mutex;
use uuid::Uuid;

/// `(website_id, funnel_id, visitor_id)`
pub type ProgressKey = (String, Uuid, String);

/// `None` means the repository was consulted and the visitor has not
/// started the funnel.
pub type ProgressSlot = Arc<Mutex<Option<FunnelProgress>>>;

pub struct ProgressStore {
    slots: Cache<ProgressKey, ProgressSlot>,
}

impl ProgressStore {
    pub fn new(capacity: u64, idle: Duration) -> Self {
        Self {
            slots: Cache::builder()
                .max_capacity(capacity)
                .time_to_idle(idle)
                .build(),
        }
    }

    /// The resident slot for `key`, if any.
    pub async fn slot(&self, key: &ProgressKey) -> Option<ProgressSlot> {
        self.slots.get(key).await
    }

    /// Installs what the repository returned, unless a slot is already
    /// resident, and returns the resident slot.
    pub async fn hydrate(&self, key: &ProgressKey, progress: Option<FunnelProgress>) -> ProgressSlot {
        self.slots
            .entry(key.clone())
            .or_insert_with(async move { Arc::new(Mutex::new(progress)) })
            .await
            .into_value()
    }

    pub async fn get(&self, key: &ProgressKey) -> Option<FunnelProgress> {
        let slot = self.slots.get(key).await?;
        let progress = slot.lock().clone();
        progress
    }

    /// Resident slots after pending evictions are applied.
    pub async fn resident(&self) -> u64 {
        self.slots.run_pending_tasks().await;
        self.slots.entry_count()
    }
}
