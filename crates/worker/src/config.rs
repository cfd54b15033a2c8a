//! Partition maintenance configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use engine_core::{Error, Result, EVENTS_TABLE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Logical table the partitions belong to
    #[serde(default = "default_table")]
    pub table: String,
    /// Months kept ready, the current month included
    #[serde(default = "default_future_months")]
    pub future_months: u32,
    /// Past months created for late events; at most `retention_months`
    #[serde(default = "default_history_months")]
    pub history_months: u32,
    /// Months of data kept; 0 disables retirement
    #[serde(default = "default_retention_months")]
    pub retention_months: u32,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

fn default_table() -> String {
    EVENTS_TABLE.to_string()
}

fn default_future_months() -> u32 {
    12
}

fn default_history_months() -> u32 {
    3
}

fn default_retention_months() -> u32 {
    24
}

fn default_maintenance_interval_secs() -> u64 {
    86_400
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            future_months: default_future_months(),
            history_months: default_history_months(),
            retention_months: default_retention_months(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl PartitionConfig {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }

    /// Rejects a history window reaching past the retention cutoff, which
    /// would backfill months that the same pass then drops.
    pub fn validate(&self) -> Result<()> {
        if self.retention_months > 0 && self.history_months > self.retention_months {
            return Err(Error::config(format!(
                "partitions.history_months ({}) exceeds partitions.retention_months ({})",
                self.history_months, self.retention_months
            )));
        }
        Ok(())
    }

    /// `months_back` limited to the months retirement keeps.
    pub fn clamp_history(&self, months_back: u32) -> u32 {
        if self.retention_months > 0 {
            months_back.min(self.retention_months)
        } else {
            months_back
        }
    }
}
