//! Ordered hand-off of flushed batches to observers.
//!
//! Observers run on their own task so funnel I/O never holds up the next
//! storage write. Batches reach them in the order they were queued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use engine_core::{BatchObserver, Event};
use parking_lot::Mutex;
use telemetry::metrics;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, warn};

type Batch = Arc<Vec<Event>>;

/// Batches queued or being observed.
#[derive(Default)]
struct Outstanding {
    count: AtomicUsize,
    idle: Notify,
}

impl Outstanding {
    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct ObserverQueue {
    observers: Vec<Arc<dyn BatchObserver>>,
    tx: mpsc::Sender<Batch>,
    /// Taken by the dispatcher task on the first dispatch
    rx: Mutex<Option<mpsc::Receiver<Batch>>>,
    outstanding: Arc<Outstanding>,
}

impl ObserverQueue {
    /// `capacity` batches may wait behind the one being observed.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            observers: Vec::new(),
            tx,
            rx: Mutex::new(Some(rx)),
            outstanding: Arc::new(Outstanding::default()),
        }
    }

    pub fn push(&mut self, observer: Arc<dyn BatchObserver>) {
        self.observers.push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Batches not yet seen by every observer.
    pub fn outstanding(&self) -> usize {
        self.outstanding.count.load(Ordering::SeqCst)
    }

    /// Queues a batch behind the earlier ones without waiting.
    ///
    /// A full queue skips the batch for every observer.
    pub fn dispatch(&self, events: Vec<Event>) {
        if self.observers.is_empty() || events.is_empty() {
            return;
        }
        self.start();

        self.outstanding.count.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.tx.try_send(Arc::new(events)) {
            self.outstanding.done();
            metrics().buffer.observer_batches_skipped.inc();
            let (reason, batch) = match err {
                TrySendError::Full(batch) => ("queue full", batch),
                TrySendError::Closed(batch) => ("dispatcher stopped", batch),
            };
            warn!(events = batch.len(), reason = reason, "Observers skip flushed batch");
        }
    }

    fn start(&self) {
        let Some(mut rx) = self.rx.lock().take() else {
            return;
        };
        let observers = self.observers.clone();
        let outstanding = Arc::clone(&self.outstanding);

        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                for observer in &observers {
                    observer.observe(&batch).await;
                }
                outstanding.done();
            }
            debug!("Observer dispatcher stopped");
        });
    }

    /// Resolves once every queued batch has been observed.
    pub async fn settled(&self) {
        loop {
            let idle = self.outstanding.idle.notified();
            if self.outstanding() == 0 {
                return;
            }
            idle.await;
        }
    }
}
