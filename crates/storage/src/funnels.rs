//! Funnel table rows and their conversions.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clickhouse::Row;
use engine_core::{
    FunnelAnalyticsIncrement, FunnelEventRow, FunnelProgress, FunnelRecord, FunnelStepRecord,
    Properties, StepType,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One funnel step joined with its funnel.
#[derive(Debug, Clone, Row, Deserialize)]
pub struct FunnelStepJoinRow {
    pub funnel_id: String,
    pub funnel_name: String,
    pub step_id: String,
    pub step_name: String,
    pub step_type: String,
    pub step_order: u32,
    pub page_path: Option<String>,
    pub event_name: Option<String>,
    pub property_key: Option<String>,
    pub property_value: Option<String>,
}

/// Why a stored funnel could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunnelRowError {
    pub funnel_id: String,
    pub reason: String,
}

/// Groups joined rows (ordered by funnel) into records.
///
/// Funnels with unreadable rows are returned separately so the rest load.
pub fn group_funnel_rows(
    website_id: &str,
    rows: Vec<FunnelStepJoinRow>,
) -> (Vec<FunnelRecord>, Vec<FunnelRowError>) {
    let mut records: Vec<FunnelRecord> = Vec::new();
    let mut errors: Vec<FunnelRowError> = Vec::new();
    let mut broken: BTreeSet<String> = BTreeSet::new();

    for row in rows {
        if broken.contains(&row.funnel_id) {
            continue;
        }
        let funnel_id = row.funnel_id.clone();
        let funnel_name = row.funnel_name.clone();

        let parsed = Uuid::parse_str(&funnel_id)
            .map_err(|e| format!("invalid funnel id: {}", e))
            .and_then(|id| step_from_row(row).map(|step| (id, step)));

        match parsed {
            Ok((id, step)) => match records.last_mut() {
                Some(record) if record.id == id => record.steps.push(step),
                _ => records.push(FunnelRecord {
                    id,
                    website_id: website_id.to_string(),
                    name: funnel_name,
                    active: true,
                    steps: vec![step],
                }),
            },
            Err(reason) => {
                records.retain(|r| r.id.to_string() != funnel_id);
                broken.insert(funnel_id.clone());
                errors.push(FunnelRowError { funnel_id, reason });
            }
        }
    }

    (records, errors)
}

fn step_from_row(row: FunnelStepJoinRow) -> Result<FunnelStepRecord, String> {
    let id = Uuid::parse_str(&row.step_id).map_err(|e| format!("invalid step id: {}", e))?;
    let step_type = StepType::parse(&row.step_type)
        .ok_or_else(|| format!("unknown step type '{}'", row.step_type))?;
    let property_value = row
        .property_value
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| format!("property value of step {} is not JSON: {}", row.step_id, e))?;

    Ok(FunnelStepRecord {
        id,
        name: row.step_name,
        step_type,
        order: row.step_order,
        page_path: row.page_path,
        event_name: row.event_name,
        property_key: row.property_key,
        property_value,
    })
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct FunnelProgressRow {
    pub website_id: String,
    pub funnel_id: String,
    pub visitor_id: String,
    pub session_id: String,
    pub current_step: u32,
    pub completed_steps: Vec<u32>,
    pub first_seen: i64,
    pub last_activity: i64,
    pub converted: u8,
    pub converted_at: Option<i64>,
    pub properties: String,
    pub updated_at: i64,
}

impl From<&FunnelProgress> for FunnelProgressRow {
    fn from(p: &FunnelProgress) -> Self {
        Self {
            website_id: p.website_id.clone(),
            funnel_id: p.funnel_id.to_string(),
            visitor_id: p.visitor_id.clone(),
            session_id: p.session_id.clone(),
            current_step: p.current_step,
            completed_steps: p.completed_steps.iter().copied().collect(),
            first_seen: p.first_seen.timestamp_millis(),
            last_activity: p.last_activity.timestamp_millis(),
            converted: u8::from(p.converted),
            converted_at: p.converted_at.map(|t| t.timestamp_millis()),
            properties: serde_json::Value::Object(p.properties.clone()).to_string(),
            updated_at: Utc::now().timestamp_millis(),
        }
    }
}

impl TryFrom<FunnelProgressRow> for FunnelProgress {
    type Error = String;

    fn try_from(row: FunnelProgressRow) -> Result<Self, Self::Error> {
        let properties: Properties = serde_json::from_str(&row.properties)
            .map_err(|e| format!("progress properties are not a JSON object: {}", e))?;

        Ok(Self {
            website_id: row.website_id,
            funnel_id: Uuid::parse_str(&row.funnel_id).map_err(|e| e.to_string())?,
            visitor_id: row.visitor_id,
            session_id: row.session_id,
            current_step: row.current_step,
            completed_steps: row.completed_steps.into_iter().collect(),
            first_seen: from_millis(row.first_seen),
            last_activity: from_millis(row.last_activity),
            converted: row.converted != 0,
            converted_at: row.converted_at.map(from_millis),
            properties,
        })
    }
}

#[derive(Debug, Clone, Row, Serialize)]
pub struct FunnelEventTableRow {
    pub website_id: String,
    pub funnel_id: String,
    pub step_id: String,
    pub step_position: u32,
    pub visitor_id: String,
    pub session_id: String,
    pub event_id: String,
    pub timestamp: i64,
}

impl From<&FunnelEventRow> for FunnelEventTableRow {
    fn from(r: &FunnelEventRow) -> Self {
        Self {
            website_id: r.website_id.clone(),
            funnel_id: r.funnel_id.to_string(),
            step_id: r.step_id.to_string(),
            step_position: r.step_position,
            visitor_id: r.visitor_id.clone(),
            session_id: r.session_id.clone(),
            event_id: r.event_id.to_string(),
            timestamp: r.timestamp.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Row, Serialize)]
pub struct FunnelAnalyticsRow {
    pub website_id: String,
    pub funnel_id: String,
    /// Days since the Unix epoch (ClickHouse `Date`)
    pub day: u16,
    pub starts: u64,
    pub conversions: u64,
    pub time_to_convert_ms: u64,
}

impl From<&FunnelAnalyticsIncrement> for FunnelAnalyticsRow {
    fn from(inc: &FunnelAnalyticsIncrement) -> Self {
        Self {
            website_id: inc.website_id.clone(),
            funnel_id: inc.funnel_id.to_string(),
            day: days_since_epoch(inc.day),
            starts: inc.starts,
            conversions: inc.conversions,
            time_to_convert_ms: inc.time_to_convert_ms,
        }
    }
}

fn days_since_epoch(day: NaiveDate) -> u16 {
    let days = (day - NaiveDate::default()).num_days();
    days.clamp(0, u16::MAX as i64) as u16
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
