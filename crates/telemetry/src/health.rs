//! Component health for the clickstream engine.
//!
//! Storage and the buffer are critical: the engine cannot accept or persist
//! events without them. Partition maintenance and the quota service only
//! degrade it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Overall health of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_serving(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

#[derive(Debug, Default)]
struct ComponentState {
    /// `None` until the component reports for the first time
    up: Option<bool>,
    detail: Option<String>,
    since: Option<DateTime<Utc>>,
    consecutive_failures: u64,
}

/// Last reported state of one component.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    critical: bool,
    state: RwLock<ComponentState>,
}

impl ComponentHealth {
    fn new(name: &'static str, critical: bool) -> Self {
        Self {
            name,
            critical,
            state: RwLock::new(ComponentState::default()),
        }
    }

    pub fn mark_up(&self) {
        let mut state = self.state.write();
        if state.up != Some(true) {
            state.since = Some(Utc::now());
        }
        state.up = Some(true);
        state.detail = None;
        state.consecutive_failures = 0;
    }

    pub fn mark_down(&self, detail: impl Into<String>) {
        let mut state = self.state.write();
        if state.up != Some(false) {
            state.since = Some(Utc::now());
        }
        state.up = Some(false);
        state.detail = Some(detail.into());
        state.consecutive_failures += 1;
    }

    /// Only an explicit success counts as up.
    pub fn is_up(&self) -> bool {
        self.state.read().up == Some(true)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn snapshot(&self) -> ComponentReport {
        let state = self.state.read();
        ComponentReport {
            name: self.name.to_string(),
            critical: self.critical,
            up: state.up,
            detail: state.detail.clone(),
            since: state.since,
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Critical components count as down until they report up; the others
    /// only once they report down.
    fn counts_as_down(&self) -> bool {
        match self.state.read().up {
            Some(up) => !up,
            None => self.critical,
        }
    }
}

/// Serialized view of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub name: String,
    pub critical: bool,
    pub up: Option<bool>,
    pub detail: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub consecutive_failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentReport>,
}

/// Health of every engine component.
pub struct HealthRegistry {
    /// Event store reachability, updated by connection checks and flushes
    pub storage: ComponentHealth,
    /// Up while the buffer accepts events
    pub buffer: ComponentHealth,
    /// Down while the partition window has gaps
    pub partitions: ComponentHealth,
    /// Down while the quota service cannot be reached
    pub quota: ComponentHealth,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            storage: ComponentHealth::new("storage", true),
            buffer: ComponentHealth::new("buffer", true),
            partitions: ComponentHealth::new("partitions", false),
            quota: ComponentHealth::new("quota", false),
        }
    }

    fn components(&self) -> [&ComponentHealth; 4] {
        [&self.storage, &self.buffer, &self.partitions, &self.quota]
    }

    pub fn status(&self) -> HealthStatus {
        let mut status = HealthStatus::Healthy;
        for component in self.components() {
            if !component.counts_as_down() {
                continue;
            }
            if component.critical {
                return HealthStatus::Unhealthy;
            }
            status = HealthStatus::Degraded;
        }
        status
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.status(),
            components: self.components().iter().map(|c| c.snapshot()).collect(),
        }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static HEALTH: std::sync::LazyLock<HealthRegistry> = std::sync::LazyLock::new(HealthRegistry::new);

/// Get the global health registry.
pub fn health() -> &'static HealthRegistry {
    &HEALTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreported_critical_component_is_unhealthy() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.status(), HealthStatus::Unhealthy);

        registry.storage.mark_up();
        registry.buffer.mark_up();
        assert_eq!(registry.status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_non_critical_failure_only_degrades() {
        let registry = HealthRegistry::new();
        registry.storage.mark_up();
        registry.buffer.mark_up();
        registry.quota.mark_down("connection refused");

        let report = registry.report();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.status.is_serving());

        let quota = report.components.iter().find(|c| c.name == "quota").unwrap();
        assert_eq!(quota.up, Some(false));
        assert_eq!(quota.detail.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_failures_count_until_recovery() {
        let registry = HealthRegistry::new();
        registry.storage.mark_down("timeout");
        registry.storage.mark_down("timeout");
        assert_eq!(registry.storage.snapshot().consecutive_failures, 2);

        let since = registry.storage.snapshot().since;
        registry.storage.mark_down("timeout");
        assert_eq!(registry.storage.snapshot().since, since);

        registry.storage.mark_up();
        let snapshot = registry.storage.snapshot();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.detail.is_none());
    }
}
