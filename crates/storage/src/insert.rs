//! Row types and batch insert helpers for ClickHouse.

use crate::client::ClickHouseClient;
use crate::enrichment::UserAgentEnricher;
use clickhouse::Row;
use engine_core::{Error, Event, Result};
use serde::Serialize;
use std::time::Instant;
use tracing::debug;

/// Flattened event row for the events table.
#[derive(Debug, Clone, Row, Serialize)]
pub struct EventRow {
    pub id: String,
    pub website_id: String,
    pub visitor_id: String,
    pub session_id: String,
    pub event_type: String,
    pub event_name: Option<String>,
    pub timestamp: i64, // DateTime64(3) as milliseconds
    pub received_at: i64,

    pub page: String,
    pub path: String,
    pub referrer: Option<String>,

    pub user_agent: Option<String>,
    pub device_type: String,
    pub browser: String,
    pub browser_version: String,
    pub os: String,

    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,

    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,

    pub time_on_page: Option<f64>,
    pub properties: String, // JSON
}

impl EventRow {
    pub fn from_event(event: &Event, enricher: &UserAgentEnricher) -> Self {
        let client = enricher.parse(event.user_agent.as_deref());
        let geo = event.geo.clone().unwrap_or_default();
        let utm = event.utm.clone().unwrap_or_default();
        let properties = serde_json::Value::Object(event.properties.clone()).to_string();

        Self {
            id: event.id.to_string(),
            website_id: event.website_id.clone(),
            visitor_id: event.visitor_id.clone(),
            session_id: event.session_id.clone(),
            event_type: event.event_type.as_str().to_string(),
            event_name: event.event_name.clone(),
            timestamp: event.timestamp.timestamp_millis(),
            received_at: event.received_at.timestamp_millis(),

            page: event.page.clone(),
            path: event.path(),
            referrer: event.referrer.clone(),

            user_agent: event.user_agent.clone(),
            device_type: client.device_type,
            browser: client.browser,
            browser_version: client.browser_version,
            os: client.os,

            country: geo.country,
            region: geo.region,
            city: geo.city,

            utm_source: utm.source,
            utm_medium: utm.medium,
            utm_campaign: utm.campaign,
            utm_term: utm.term,
            utm_content: utm.content,

            time_on_page: event.time_on_page,
            properties,
        }
    }
}

/// Inserts rows into `table` in one INSERT.
pub async fn insert_rows<T>(client: &ClickHouseClient, table: &str, rows: &[T]) -> Result<usize>
where
    T: Row + Serialize,
{
    if rows.is_empty() {
        return Ok(0);
    }

    let start = Instant::now();
    let qualified = client.qualified(table)?;

    let mut insert = client
        .inner()
        .insert(&qualified)
        .map_err(|e| Error::storage(format!("insert into {}: {}", qualified, e)))?;

    for row in rows {
        insert
            .write(row)
            .await
            .map_err(|e| Error::storage(format!("write to {}: {}", qualified, e)))?;
    }

    insert
        .end()
        .await
        .map_err(|e| Error::storage(format!("commit to {}: {}", qualified, e)))?;

    debug!(
        table = %qualified,
        count = rows.len(),
        latency_ms = %start.elapsed().as_millis(),
        "Inserted rows"
    );

    Ok(rows.len())
}
