//! Funnel matcher: feeds flushed events through every active funnel of
//! their website.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use engine_core::{
    BatchObserver, Event, FunnelAnalyticsIncrement, FunnelAnalyticsSink,
    FunnelDefinitionStore, FunnelEventRow, FunnelProgress, FunnelProgressRepository,
};
use telemetry::metrics;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::DefinitionCache;
use crate::config::FunnelConfig;
use crate::definition::FunnelDefinition;
use crate::progress::{ProgressKey, ProgressStore};
use crate::state::{apply, Transition};

/// Counts from one `process_*` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSummary {
    pub events: usize,
    /// Event and funnel pairs with at least one matching step
    pub matches: usize,
    pub starts: usize,
    pub advances: usize,
    pub conversions: usize,
    /// Events skipped because definitions could not be loaded
    pub lookup_failures: usize,
    pub sink_errors: usize,
}

/// Rows and increments collected while processing, written once at the end.
#[derive(Default)]
struct Pending {
    /// Latest state of each changed key, captured under its slot lock
    dirty: BTreeMap<ProgressKey, FunnelProgress>,
    rows: BTreeMap<Uuid, Vec<FunnelEventRow>>,
    increments: BTreeMap<(Uuid, NaiveDate), FunnelAnalyticsIncrement>,
}

impl Pending {
    fn add_increment(&mut self, increment: FunnelAnalyticsIncrement) {
        self.increments
            .entry((increment.funnel_id, increment.day))
            .and_modify(|existing| existing.merge(&increment))
            .or_insert(increment);
    }
}

/// Tracks every visitor's progress through the funnels of their website.
///
/// Events must be supplied in arrival order; the buffer guarantees this by
/// observing batches in flush order.
pub struct FunnelMatcher {
    definitions: DefinitionCache,
    progress: ProgressStore,
    repository: Arc<dyn FunnelProgressRepository>,
    sink: Arc<dyn FunnelAnalyticsSink>,
}

impl FunnelMatcher {
    pub fn new(
        config: &FunnelConfig,
        definitions: Arc<dyn FunnelDefinitionStore>,
        repository: Arc<dyn FunnelProgressRepository>,
        sink: Arc<dyn FunnelAnalyticsSink>,
    ) -> Self {
        Self {
            definitions: DefinitionCache::new(definitions, config),
            progress: ProgressStore::new(config.progress_capacity, config.progress_idle()),
            repository,
            sink,
        }
    }

    /// Current progress of a visitor, if resident in memory.
    pub async fn progress(
        &self,
        website_id: &str,
        funnel_id: Uuid,
        visitor_id: &str,
    ) -> Option<FunnelProgress> {
        self.progress
            .get(&(website_id.to_string(), funnel_id, visitor_id.to_string()))
            .await
    }

    /// Progress entries currently held in memory.
    pub async fn resident_progress(&self) -> u64 {
        self.progress.resident().await
    }

    pub fn definitions(&self) -> &DefinitionCache {
        &self.definitions
    }

    pub async fn process_event(&self, event: &Event) -> MatchSummary {
        self.process_batch(std::slice::from_ref(event)).await
    }

    /// Processes events in order, then persists progress and analytics.
    pub async fn process_batch(&self, events: &[Event]) -> MatchSummary {
        let mut summary = MatchSummary::default();
        let mut pending = Pending::default();

        for event in events {
            self.match_event(event, &mut pending, &mut summary).await;
        }
        summary.events = events.len();
        metrics().funnels.events_processed.inc_by(events.len() as u64);

        self.persist(pending, &mut summary).await;

        if summary.matches > 0 {
            debug!(
                events = summary.events,
                matches = summary.matches,
                starts = summary.starts,
                advances = summary.advances,
                conversions = summary.conversions,
                "Processed funnel batch"
            );
        }
        summary
    }

    async fn match_event(&self, event: &Event, pending: &mut Pending, summary: &mut MatchSummary) {
        let funnels = match self.definitions.get(&event.website_id).await {
            Ok(funnels) => funnels,
            Err(e) => {
                metrics().funnels.lookup_failures.inc();
                summary.lookup_failures += 1;
                warn!(
                    website_id = %event.website_id,
                    event_id = %event.id,
                    error = %e,
                    "Funnel lookup failed; skipping event"
                );
                return;
            }
        };

        for funnel in funnels.iter() {
            let matched = funnel.matching_positions(event);
            if matched.is_empty() {
                continue;
            }
            summary.matches += 1;

            let key: ProgressKey = (event.website_id.clone(), funnel.id, event.visitor_id.clone());
            let slot = match self.progress.slot(&key).await {
                Some(slot) => slot,
                None => match self
                    .repository
                    .load_progress(&event.website_id, funnel.id, &event.visitor_id)
                    .await
                {
                    Ok(stored) => self.progress.hydrate(&key, stored).await,
                    Err(e) => {
                        metrics().funnels.sink_errors.inc();
                        summary.sink_errors += 1;
                        warn!(
                            funnel_id = %funnel.id,
                            visitor_id = %event.visitor_id,
                            error = %e,
                            "Could not load funnel progress; skipping funnel for event"
                        );
                        continue;
                    }
                },
            };

            let (transition, snapshot) = {
                let mut progress = slot.lock();
                let transition = apply(&mut progress, funnel, &matched, event);
                (transition, progress.clone())
            };
            if transition.is_change() {
                if let Some(snapshot) = snapshot {
                    pending.dirty.insert(key, snapshot);
                }
            }
            record(transition, funnel, event, pending, summary);
        }
    }

    async fn persist(&self, pending: Pending, summary: &mut MatchSummary) {
        for (key, progress) in &pending.dirty {
            if let Err(e) = self.repository.save_progress(progress).await {
                metrics().funnels.sink_errors.inc();
                summary.sink_errors += 1;
                warn!(
                    funnel_id = %key.1,
                    visitor_id = %key.2,
                    error = %e,
                    "Failed to save funnel progress"
                );
            }
        }

        let mut increments: BTreeMap<Uuid, Vec<FunnelAnalyticsIncrement>> = BTreeMap::new();
        for ((funnel_id, _), increment) in pending.increments {
            increments.entry(funnel_id).or_default().push(increment);
        }

        let funnel_ids: BTreeSet<Uuid> = pending
            .rows
            .keys()
            .chain(increments.keys())
            .copied()
            .collect();

        for funnel_id in funnel_ids {
            if let Some(rows) = pending.rows.get(&funnel_id) {
                if let Err(e) = self.sink.record_steps(rows).await {
                    metrics().funnels.sink_errors.inc();
                    summary.sink_errors += 1;
                    warn!(funnel_id = %funnel_id, rows = rows.len(), error = %e, "Failed to record funnel steps");
                }
            }
            if let Some(incs) = increments.get(&funnel_id) {
                if let Err(e) = self.sink.increment(incs).await {
                    metrics().funnels.sink_errors.inc();
                    summary.sink_errors += 1;
                    warn!(funnel_id = %funnel_id, error = %e, "Failed to record funnel analytics");
                }
            }
        }
    }
}

fn record(
    transition: Transition,
    funnel: &FunnelDefinition,
    event: &Event,
    pending: &mut Pending,
    summary: &mut MatchSummary,
) {
    let day = event.timestamp.date_naive();

    let position = match transition {
        Transition::Started { .. } => {
            summary.starts += 1;
            metrics().funnels.starts.inc();
            pending.add_increment(FunnelAnalyticsIncrement::start(
                &event.website_id,
                funnel.id,
                day,
            ));
            0
        }
        Transition::Advanced { position, .. } => {
            summary.advances += 1;
            metrics().funnels.advances.inc();
            position
        }
        Transition::Ignored | Transition::Touched | Transition::AlreadyConverted => return,
    };

    if let Some(step) = funnel.step(position) {
        pending.rows.entry(funnel.id).or_default().push(FunnelEventRow {
            website_id: event.website_id.clone(),
            funnel_id: funnel.id,
            step_id: step.id,
            step_position: position,
            visitor_id: event.visitor_id.clone(),
            session_id: event.session_id.clone(),
            event_id: event.id,
            timestamp: event.timestamp,
        });
    }

    if let Some(time_to_convert_ms) = transition.conversion() {
        summary.conversions += 1;
        metrics().funnels.conversions.inc();
        pending.add_increment(FunnelAnalyticsIncrement::conversion(
            &event.website_id,
            funnel.id,
            day,
            time_to_convert_ms,
        ));
        debug!(
            funnel_id = %funnel.id,
            visitor_id = %event.visitor_id,
            time_to_convert_ms = time_to_convert_ms,
            "Funnel converted"
        );
    }
}

#[async_trait]
impl BatchObserver for FunnelMatcher {
    async fn observe(&self, events: &[Event]) {
        self.process_batch(events).await;
    }
}
