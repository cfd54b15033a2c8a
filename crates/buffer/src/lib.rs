//! In-memory event buffer for the clickstream engine.
//!
//! Ingestion handlers enqueue validated events without awaiting; a flush
//! loop writes them to the event store in batches and hands each batch to
//! the registered observers.

pub mod batch;
pub mod config;
pub mod event_buffer;
pub mod observers;

pub use batch::BufferedBatch;
pub use config::*;
pub use event_buffer::*;
pub use observers::ObserverQueue;
