//! Event buffer with timer, size and drain triggered flushes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use engine_core::{BatchObserver, Error, Event, EventStore, Result, WriteOutcome};
use parking_lot::Mutex;
use telemetry::{health, metrics};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::batch::BufferedBatch;
use crate::config::BufferConfig;
use crate::observers::ObserverQueue;

/// What a single flush did with the detached batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushReport {
    /// Nothing was pending.
    Empty,
    /// The store took the batch, possibly refusing some rows.
    Written {
        events: usize,
        accepted: usize,
        rejected: usize,
        retries: u32,
    },
    /// Every attempt failed; the events are lost.
    Dropped {
        events: usize,
        retries: u32,
        error: String,
    },
}

impl FlushReport {
    /// Number of events detached from the buffer.
    pub fn events(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Written { events, .. } | Self::Dropped { events, .. } => *events,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }
}

struct BufferState {
    batch: BufferedBatch,
    closed: bool,
}

/// Accumulates events in memory and writes them to an [`EventStore`] in batches.
///
/// Shared as `Arc<EventBuffer>` between request handlers, the flush loop and
/// the shutdown path.
pub struct EventBuffer {
    config: BufferConfig,
    store: Arc<dyn EventStore>,
    observers: ObserverQueue,
    state: Mutex<BufferState>,
    /// Held across swap, write and dispatch so batches reach the store and
    /// the observers in swap order.
    flush_lock: tokio::sync::Mutex<()>,
    flush_wanted: Notify,
    shutdown_tx: watch::Sender<bool>,
}

impl EventBuffer {
    pub fn new(config: BufferConfig, store: Arc<dyn EventStore>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let observers = ObserverQueue::new(config.observer_queue_batches);
        Self {
            config,
            store,
            observers,
            state: Mutex::new(BufferState {
                batch: BufferedBatch::new(),
                closed: false,
            }),
            flush_lock: tokio::sync::Mutex::new(()),
            flush_wanted: Notify::new(),
            shutdown_tx,
        }
    }

    /// Registers an observer that sees every flushed batch after its write.
    ///
    /// Observers run on a dispatcher task, never inside [`EventBuffer::flush`].
    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Events enqueued and not yet detached by a flush.
    pub fn pending(&self) -> usize {
        self.state.lock().batch.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Appends one event to the active batch.
    pub fn enqueue(&self, event: Event) -> Result<()> {
        let pending = {
            let mut state = self.state.lock();
            self.admit(&state, 1)?;
            state.batch.push(event);
            state.batch.len()
        };
        self.after_enqueue(1, pending);
        Ok(())
    }

    /// Appends all events or none of them.
    pub fn enqueue_batch(&self, events: Vec<Event>) -> Result<()> {
        let count = events.len();
        if count == 0 {
            return Ok(());
        }

        let pending = {
            let mut state = self.state.lock();
            self.admit(&state, count)?;
            state.batch.extend(events);
            state.batch.len()
        };
        self.after_enqueue(count, pending);
        Ok(())
    }

    fn admit(&self, state: &BufferState, incoming: usize) -> Result<()> {
        if state.closed {
            return Err(Error::BufferClosed);
        }
        let pending = state.batch.len();
        if pending + incoming > self.config.max_pending {
            metrics().ingest.backpressure_rejections.inc();
            return Err(Error::buffer_full(pending, self.config.max_pending));
        }
        Ok(())
    }

    fn after_enqueue(&self, count: usize, pending: usize) {
        metrics().buffer.events_enqueued.inc_by(count as u64);
        metrics().buffer.depth.set(pending as u64);
        if pending >= self.config.flush_threshold {
            self.flush_wanted.notify_one();
        }
    }

    /// Waits until the observers have seen every batch flushed so far.
    pub async fn observers_settled(&self) {
        self.observers.settled().await;
    }

    /// Detaches the active batch, writes it and queues it for the observers.
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;

        let (events, age) = {
            let mut state = self.state.lock();
            let age = state.batch.age();
            (state.batch.take(), age)
        };
        metrics().buffer.depth.set(self.pending() as u64);

        if events.is_empty() {
            return FlushReport::Empty;
        }

        let started = Instant::now();
        metrics().buffer.flushes.inc();

        let (result, retries) = self.write_with_retry(&events).await;
        let report = match result {
            Ok(outcome) => {
                health().storage.mark_up();
                let rejected = outcome.rejected.len();
                if rejected > 0 {
                    record_rejections(&outcome);
                }
                metrics().buffer.events_flushed.inc_by(outcome.accepted as u64);
                debug!(
                    events = events.len(),
                    accepted = outcome.accepted,
                    rejected = rejected,
                    retries = retries,
                    batch_age_ms = %age.as_millis(),
                    "Flushed batch"
                );
                FlushReport::Written {
                    events: events.len(),
                    accepted: outcome.accepted,
                    rejected,
                    retries,
                }
            }
            Err(e) => {
                health().storage.mark_down(e.to_string());
                metrics().buffer.batches_dropped.inc();
                metrics().buffer.events_dropped.inc_by(events.len() as u64);
                error!(
                    events = events.len(),
                    retries = retries,
                    error = %e,
                    "Data loss: dropping batch after exhausting storage retries"
                );
                FlushReport::Dropped {
                    events: events.len(),
                    retries,
                    error: e.to_string(),
                }
            }
        };

        self.observers.dispatch(events);

        metrics()
            .buffer
            .flush_latency_ms
            .observe(started.elapsed().as_millis() as u64);
        report
    }

    /// Writes with exponential backoff; returns the result and retries used.
    async fn write_with_retry(&self, events: &[Event]) -> (Result<WriteOutcome>, u32) {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.backoff(attempt);
                warn!(
                    attempt = attempt,
                    backoff_ms = %backoff.as_millis(),
                    events = events.len(),
                    "Retrying batch write"
                );
                metrics().buffer.retries.inc();
                tokio::time::sleep(backoff).await;
            }

            let started = Instant::now();
            match self.store.write_batch(events).await {
                Ok(outcome) => {
                    metrics().storage.writes.inc();
                    metrics()
                        .storage
                        .write_latency_ms
                        .observe(started.elapsed().as_millis() as u64);
                    return (Ok(outcome), attempt);
                }
                Err(e) => {
                    metrics().storage.write_errors.inc();
                    warn!(attempt = attempt, error = %e, "Batch write failed");
                    last_error = Some(e);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| Error::internal("batch write failed"));
        (Err(err), self.config.max_retries)
    }

    /// Spawns the loop that flushes on the interval or the size trigger.
    ///
    /// The loop exits once shutdown begins; the final flush belongs to
    /// [`EventBuffer::shutdown`].
    pub fn start_flush_task(self: &Arc<Self>) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        health().buffer.mark_up();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(buffer.config.flush_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!(
                interval_ms = buffer.config.flush_interval_ms,
                threshold = buffer.config.flush_threshold,
                "Flush loop started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = buffer.flush_wanted.notified() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                if buffer.is_closed() {
                    break;
                }
                buffer.flush().await;
            }

            debug!("Flush loop stopped");
        })
    }

    /// Closes the buffer and drains it, waiting at most `timeout`.
    ///
    /// The deadline covers the final storage write. Observers get whatever
    /// time remains; a late observer is logged and does not fail shutdown.
    /// On timeout the final flush keeps running in the background.
    pub async fn shutdown(self: &Arc<Self>, timeout: Duration) -> Result<FlushReport> {
        let pending = {
            let mut state = self.state.lock();
            state.closed = true;
            state.batch.len()
        };
        self.shutdown_tx.send_replace(true);
        health().buffer.mark_down("draining for shutdown");
        metrics().buffer.closed.set(1);

        info!(pending = pending, timeout_ms = %timeout.as_millis(), "Draining event buffer");

        let deadline = tokio::time::Instant::now() + timeout;
        let buffer = Arc::clone(self);
        let mut handle = tokio::spawn(async move { buffer.flush().await });

        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(report)) => {
                info!(events = report.events(), "Event buffer drained");
                if tokio::time::timeout_at(deadline, self.observers.settled())
                    .await
                    .is_err()
                {
                    warn!(
                        batches = self.observers.outstanding(),
                        "Shutdown deadline elapsed before observers caught up"
                    );
                }
                Ok(report)
            }
            Ok(Err(e)) => Err(Error::internal(format!("final flush task failed: {}", e))),
            Err(_) => {
                warn!(
                    pending = pending,
                    timeout_ms = %timeout.as_millis(),
                    "Shutdown deadline elapsed; final flush continues in background"
                );
                Err(Error::ShutdownTimeout(timeout))
            }
        }
    }
}

/// Counts and logs refused rows grouped by reason.
fn record_rejections(outcome: &WriteOutcome) {
    let mut by_reason: BTreeMap<&'static str, Vec<&engine_core::RowRejection>> = BTreeMap::new();
    for rejection in &outcome.rejected {
        let reason = rejection.error.error_code().unwrap_or("OTHER");
        by_reason.entry(reason).or_default().push(rejection);
        if rejection.error.is_partition_gap() {
            metrics().buffer.gap_rejections.inc();
        }
    }
    metrics().buffer.rows_rejected.inc_by(outcome.rejected.len() as u64);

    for (reason, rows) in by_reason {
        let first = rows[0];
        warn!(
            reason = reason,
            rows = rows.len(),
            first_index = first.index,
            first_event_id = %first.event_id,
            error = %first.error,
            "Storage rejected rows"
        );
    }
}
