//! Periodic partition maintenance.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::partitions::{PartitionManager, PartitionReport, RetirementReport};

/// Results of one maintenance iteration. A `None` report means that step
/// failed or was disabled.
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    pub future: Option<PartitionReport>,
    pub historical: Option<PartitionReport>,
    pub retirement: Option<RetirementReport>,
}

/// Runs ensure-future, ensure-historical and retirement on an interval.
pub struct PartitionMaintenanceWorker {
    manager: Arc<PartitionManager>,
}

impl PartitionMaintenanceWorker {
    pub fn new(manager: Arc<PartitionManager>) -> Self {
        Self { manager }
    }

    /// One maintenance pass. Each step runs even if an earlier one failed.
    pub async fn run_once(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let config = self.manager.config();
        let mut report = MaintenanceReport::default();

        match self
            .manager
            .ensure_future_partitions_at(now, config.future_months)
            .await
        {
            Ok(future) => report.future = Some(future),
            Err(e) => error!(error = %e, "Future partition check failed"),
        }

        match self
            .manager
            .ensure_historical_partitions_at(now, config.history_months)
            .await
        {
            Ok(historical) => report.historical = Some(historical),
            Err(e) => error!(error = %e, "Historical partition check failed"),
        }

        if config.retention_months > 0 {
            match self
                .manager
                .retire_partitions_older_than_at(now, config.retention_months)
                .await
            {
                Ok(retirement) => report.retirement = Some(retirement),
                Err(e) => error!(error = %e, "Partition retirement failed"),
            }
        }

        report
    }

    /// Spawns the maintenance loop. The first pass runs one interval after
    /// start; the loop exits when `shutdown` turns true.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.manager.config().maintenance_interval();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                table = self.manager.table(),
                interval_secs = period.as_secs(),
                "Partition maintenance worker started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.run_once(Utc::now()).await;
                        if report.future.as_ref().is_some_and(PartitionReport::has_gaps) {
                            warn!(table = self.manager.table(), "Partition window still has gaps");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Partition maintenance worker stopped");
        })
    }
}
