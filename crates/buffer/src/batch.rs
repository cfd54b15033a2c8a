//! The active batch of buffered events.

use engine_core::Event;
use std::time::{Duration, Instant};

/// Events awaiting one storage write, in insertion order.
#[derive(Debug)]
pub struct BufferedBatch {
    events: Vec<Event>,
    created_at: Instant,
}

impl BufferedBatch {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            created_at: Instant::now(),
        }
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn extend(&mut self, events: Vec<Event>) {
        self.events.extend(events);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time since the batch was last emptied.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Take events and reset the batch.
    pub fn take(&mut self) -> Vec<Event> {
        self.created_at = Instant::now();
        std::mem::take(&mut self.events)
    }
}

impl Default for BufferedBatch {
    fn default() -> Self {
        Self::new()
    }
}
