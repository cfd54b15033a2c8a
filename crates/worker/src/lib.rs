//! Background maintenance for the clickstream engine.
//!
//! - Partition lifecycle (create ahead, backfill, retire past retention)
//! - Maintenance scheduler driving it on an interval

pub mod config;
pub mod partitions;
pub mod scheduler;

pub use config::PartitionConfig;
pub use partitions::{PartitionManager, PartitionReport, RetirementReport};
pub use scheduler::{MaintenanceReport, PartitionMaintenanceWorker};
