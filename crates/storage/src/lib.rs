//! Storage backends for the clickstream engine.
//!
//! [`ClickHouseStore`] is the production backend; [`MemoryStore`] backs the
//! `memory` storage mode and the test suites.

pub mod client;
pub mod config;
pub mod enrichment;
pub mod funnels;
pub mod health;
pub mod insert;
pub mod memory;
pub mod schema;
pub mod store;

pub use client::*;
pub use config::*;
pub use memory::MemoryStore;
pub use store::ClickHouseStore;
