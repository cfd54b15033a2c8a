//! Funnel records as exchanged with the definition store and analytics sinks.
//!
//! These are flat, storage-shaped records. The funnel crate compiles
//! [`FunnelRecord`] into a typed definition before matching.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::events::Properties;

/// Which condition field of a step is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    /// Matches the page path of pageview events
    Page,
    /// Matches the event name
    Event,
    /// Matches a property predicate
    Custom,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Event => "event",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "page" => Some(Self::Page),
            "event" => Some(Self::Event),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// One step of a funnel as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStepRecord {
    pub id: Uuid,
    pub name: String,
    pub step_type: StepType,
    pub order: u32,
    pub page_path: Option<String>,
    pub event_name: Option<String>,
    pub property_key: Option<String>,
    pub property_value: Option<Value>,
}

impl FunnelStepRecord {
    pub fn page(order: u32, path: impl Into<String>) -> Self {
        Self::empty(order, StepType::Page, |step| step.page_path = Some(path.into()))
    }

    pub fn event(order: u32, name: impl Into<String>) -> Self {
        Self::empty(order, StepType::Event, |step| step.event_name = Some(name.into()))
    }

    pub fn custom(order: u32, key: impl Into<String>, value: Value) -> Self {
        Self::empty(order, StepType::Custom, |step| {
            step.property_key = Some(key.into());
            step.property_value = Some(value);
        })
    }

    fn empty(order: u32, step_type: StepType, fill: impl FnOnce(&mut Self)) -> Self {
        let mut step = Self {
            id: Uuid::new_v4(),
            name: format!("step {}", order),
            step_type,
            order,
            page_path: None,
            event_name: None,
            property_key: None,
            property_value: None,
        };
        fill(&mut step);
        step
    }
}

/// A funnel definition as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelRecord {
    pub id: Uuid,
    pub website_id: String,
    pub name: String,
    pub active: bool,
    pub steps: Vec<FunnelStepRecord>,
}

impl FunnelRecord {
    pub fn new(
        website_id: impl Into<String>,
        name: impl Into<String>,
        steps: Vec<FunnelStepRecord>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            website_id: website_id.into(),
            name: name.into(),
            active: true,
            steps,
        }
    }
}

/// Progress of one visitor through one funnel.
///
/// Step positions index the funnel's steps sorted by order, starting at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelProgress {
    pub website_id: String,
    pub funnel_id: Uuid,
    pub visitor_id: String,
    /// Session of the last matching event
    pub session_id: String,
    /// Position of the last completed step
    pub current_step: u32,
    pub completed_steps: BTreeSet<u32>,
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub converted: bool,
    pub converted_at: Option<DateTime<Utc>>,
    /// Matched event properties keyed by step id
    #[serde(default)]
    pub properties: Properties,
}

/// One step completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelEventRow {
    pub website_id: String,
    pub funnel_id: Uuid,
    pub step_id: Uuid,
    pub step_position: u32,
    pub visitor_id: String,
    pub session_id: String,
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Daily analytics delta for a funnel.
///
/// Rows are summed by the store; average time to convert is
/// `time_to_convert_ms / conversions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelAnalyticsIncrement {
    pub website_id: String,
    pub funnel_id: Uuid,
    pub day: NaiveDate,
    pub starts: u64,
    pub conversions: u64,
    pub time_to_convert_ms: u64,
}

impl FunnelAnalyticsIncrement {
    pub fn start(website_id: &str, funnel_id: Uuid, day: NaiveDate) -> Self {
        Self {
            website_id: website_id.to_string(),
            funnel_id,
            day,
            starts: 1,
            conversions: 0,
            time_to_convert_ms: 0,
        }
    }

    pub fn conversion(
        website_id: &str,
        funnel_id: Uuid,
        day: NaiveDate,
        time_to_convert_ms: u64,
    ) -> Self {
        Self {
            website_id: website_id.to_string(),
            funnel_id,
            day,
            starts: 0,
            conversions: 1,
            time_to_convert_ms,
        }
    }

    /// Folds another increment for the same key into this one.
    pub fn merge(&mut self, other: &Self) {
        self.starts += other.starts;
        self.conversions += other.conversions;
        self.time_to_convert_ms += other.time_to_convert_ms;
    }
}
