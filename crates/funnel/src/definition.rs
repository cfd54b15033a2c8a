//! Typed funnel definitions compiled from stored records.

use std::collections::BTreeSet;

use engine_core::{page_path, Error, Event, EventType, FunnelRecord, FunnelStepRecord, Result, StepType};
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

/// URL path pattern of a `page` step.
#[derive(Debug, Clone)]
pub enum PagePattern {
    Exact(String),
    /// `*` matches any run of characters, `/` included
    Wildcard(Regex),
}

impl PagePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let path = normalize_path(&page_path(pattern.trim()));
        if !path.contains('*') {
            return Ok(Self::Exact(path));
        }

        let body = path
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Regex::new(&format!("^{}$", body))
            .map(Self::Wildcard)
            .map_err(|e| Error::funnel_lookup(format!("bad page pattern '{}': {}", pattern, e)))
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = normalize_path(path);
        match self {
            Self::Exact(expected) => *expected == path,
            Self::Wildcard(re) => re.is_match(&path),
        }
    }
}

/// Drops a trailing slash so `/pricing/` and `/pricing` compare equal.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Event name pattern of an `event` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventNamePattern {
    Exact(String),
    /// Written as `prefix*`
    Prefix(String),
}

impl EventNamePattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == name,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

/// `property == literal` over the event's property bag.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPredicate {
    /// Dotted path into nested maps
    pub path: String,
    pub expected: Value,
}

impl PropertyPredicate {
    pub fn matches(&self, event: &Event) -> bool {
        event
            .property(&self.path)
            .is_some_and(|actual| values_equal(actual, &self.expected))
    }
}

/// JSON equality where numbers compare by value (`1` equals `1.0`).
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => actual == expected,
    }
}

#[derive(Debug, Clone)]
pub enum StepCondition {
    Page(PagePattern),
    Event(EventNamePattern),
    Property(PropertyPredicate),
}

impl StepCondition {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Page(pattern) => {
                event.event_type == EventType::Pageview && pattern.matches(&event.path())
            }
            Self::Event(pattern) => event
                .event_name
                .as_deref()
                .is_some_and(|name| pattern.matches(name)),
            Self::Property(predicate) => predicate.matches(event),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunnelStep {
    pub id: Uuid,
    pub name: String,
    /// Stored order value
    pub order: u32,
    pub condition: StepCondition,
}

/// A funnel ready for matching. Steps are sorted by order; progress refers
/// to them by position in this list.
#[derive(Debug, Clone)]
pub struct FunnelDefinition {
    pub id: Uuid,
    pub website_id: String,
    pub name: String,
    pub steps: Vec<FunnelStep>,
}

impl FunnelDefinition {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Position of the final step.
    pub fn last_position(&self) -> u32 {
        self.steps.len().saturating_sub(1) as u32
    }

    pub fn step(&self, position: u32) -> Option<&FunnelStep> {
        self.steps.get(position as usize)
    }

    /// Positions of every step the event satisfies, ascending.
    pub fn matching_positions(&self, event: &Event) -> Vec<u32> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.condition.matches(event))
            .map(|(position, _)| position as u32)
            .collect()
    }
}

impl TryFrom<FunnelRecord> for FunnelDefinition {
    type Error = Error;

    fn try_from(record: FunnelRecord) -> Result<Self> {
        let invalid = |reason: String| {
            Error::funnel_lookup(format!("funnel {} ({}): {}", record.id, record.name, reason))
        };

        if record.steps.is_empty() {
            return Err(invalid("funnel has no steps".into()));
        }

        let mut orders = BTreeSet::new();
        for step in &record.steps {
            if !orders.insert(step.order) {
                return Err(invalid(format!("step order {} is used twice", step.order)));
            }
        }

        let mut steps = record
            .steps
            .iter()
            .map(|step| compile_step(step).map_err(|reason| invalid(reason)))
            .collect::<Result<Vec<_>>>()?;
        steps.sort_by_key(|step| step.order);

        Ok(Self {
            id: record.id,
            website_id: record.website_id,
            name: record.name,
            steps,
        })
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn compile_step(step: &FunnelStepRecord) -> std::result::Result<FunnelStep, String> {
    let missing = |field: &str| {
        format!(
            "{} step '{}' has no {}",
            step.step_type.as_str(),
            step.name,
            field
        )
    };
    let condition = match step.step_type {
        StepType::Page => {
            let pattern = present(&step.page_path).ok_or_else(|| missing("page path"))?;
            StepCondition::Page(PagePattern::parse(pattern).map_err(|e| e.to_string())?)
        }
        StepType::Event => {
            let name = present(&step.event_name).ok_or_else(|| missing("event name"))?;
            StepCondition::Event(EventNamePattern::parse(name))
        }
        StepType::Custom => {
            let key = present(&step.property_key).ok_or_else(|| missing("property key"))?;
            let expected = step
                .property_value
                .clone()
                .ok_or_else(|| missing("property value"))?;
            StepCondition::Property(PropertyPredicate {
                path: key.to_string(),
                expected,
            })
        }
    };

    Ok(FunnelStep {
        id: step.id,
        name: step.name.clone(),
        order: step.order,
        condition,
    })
}
