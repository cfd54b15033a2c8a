//! Funnel matching for the clickstream engine.
//!
//! Each flushed event is checked against the active funnels of its website;
//! matching events move the visitor's progress forward one step at a time
//! and produce step rows and daily analytics increments.

pub mod cache;
pub mod config;
pub mod definition;
pub mod matcher;
pub mod progress;
pub mod state;

pub use config::FunnelConfig;
pub use definition::{FunnelDefinition, FunnelStep, StepCondition};
pub use matcher::{FunnelMatcher, MatchSummary};
pub use state::Transition;
