//! In-process telemetry for the clickstream engine.
//!
//! Counters, gauges and latency histograms live in a global registry
//! read by the health endpoints and logged by the binary on shutdown.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
