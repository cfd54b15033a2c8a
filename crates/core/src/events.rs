//! Event type definitions and ingestion-time validation.
//!
//! [`TrackEvent`] is the wire shape submitted by tracking clients (camelCase).
//! Validation happens before anything reaches the buffer and reports the
//! first violated field; a batch is accepted or rejected as a whole.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::error::{Error, Result, ValidationErrorCode};
use crate::limits::{MAX_BATCH_EVENTS, MAX_FUTURE_SKEW_SECS, MAX_PROPERTIES_BYTES};

/// Open property bag attached to events and funnel progress.
///
/// Keys are kept sorted; values are arbitrary JSON.
pub type Properties = serde_json::Map<String, Value>;

/// Event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Pageview,
    Custom,
    Click,
    Outbound,
}

impl EventType {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pageview => "pageview",
            Self::Custom => "custom",
            Self::Click => "click",
            Self::Outbound => "outbound",
        }
    }
}

/// Geolocation resolved by the client or an edge proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct GeoLocation {
    #[validate(length(max = 128))]
    pub country: Option<String>,
    #[validate(length(max = 128))]
    pub region: Option<String>,
    #[validate(length(max = 128))]
    pub city: Option<String>,
}

/// Campaign attribution parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct UtmParams {
    #[validate(length(max = 256))]
    pub source: Option<String>,
    #[validate(length(max = 256))]
    pub medium: Option<String>,
    #[validate(length(max = 256))]
    pub campaign: Option<String>,
    #[validate(length(max = 256))]
    pub term: Option<String>,
    #[validate(length(max = 256))]
    pub content: Option<String>,
}

/// A single accepted clickstream event.
///
/// Immutable once created; owned by the buffer until flushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Server-assigned event ID
    pub id: Uuid,
    pub website_id: String,
    pub visitor_id: String,
    pub session_id: String,
    pub event_type: EventType,
    /// Name of custom/click/outbound events
    pub event_name: Option<String>,
    /// Page URL, absolute or relative
    pub page: String,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub geo: Option<GeoLocation>,
    pub utm: Option<UtmParams>,
    /// Seconds spent on the page
    pub time_on_page: Option<f64>,
    #[serde(default)]
    pub properties: Properties,
    /// Client-reported occurrence time
    pub timestamp: DateTime<Utc>,
    /// Server receive time
    pub received_at: DateTime<Utc>,
}

impl Event {
    /// Creates a pageview with generated ID and timestamps.
    pub fn pageview(
        website_id: impl Into<String>,
        visitor_id: impl Into<String>,
        session_id: impl Into<String>,
        page: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            website_id: website_id.into(),
            visitor_id: visitor_id.into(),
            session_id: session_id.into(),
            event_type: EventType::Pageview,
            event_name: None,
            page: page.into(),
            referrer: None,
            user_agent: None,
            geo: None,
            utm: None,
            time_on_page: None,
            properties: Properties::new(),
            timestamp: now,
            received_at: now,
        }
    }

    /// Creates a custom event with the given name.
    pub fn custom(
        website_id: impl Into<String>,
        visitor_id: impl Into<String>,
        session_id: impl Into<String>,
        page: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut event = Self::pageview(website_id, visitor_id, session_id, page);
        event.event_type = EventType::Custom;
        event.event_name = Some(name.into());
        event
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// URL path of the page, without query string or fragment.
    pub fn path(&self) -> String {
        page_path(&self.page)
    }

    /// Looks up a property by dotted path (`plan.tier` reaches nested maps).
    pub fn property(&self, dotted: &str) -> Option<&Value> {
        let mut segments = dotted.split('.');
        let mut current = self.properties.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Extracts the path component of an absolute or relative page URL.
pub fn page_path(page: &str) -> String {
    if let Ok(url) = Url::parse(page) {
        return url.path().to_string();
    }
    let end = page.find(['?', '#']).unwrap_or(page.len());
    let path = &page[..end];
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Website ids travel in URL paths of downstream services, so they are
/// limited to ASCII letters, digits, `-` and `_`.
pub fn is_safe_identifier(id: &str) -> bool {
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_website_id(id: &str) -> std::result::Result<(), ValidationError> {
    if is_safe_identifier(id) {
        Ok(())
    } else {
        Err(invalid(
            "website_id",
            "may only contain letters, digits, '-' and '_'",
        ))
    }
}

fn validate_page(page: &str) -> std::result::Result<(), ValidationError> {
    if page.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("page", "must not contain whitespace"));
    }
    match Url::parse(page) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        Ok(_) => Err(invalid("page", "absolute URLs must use http or https")),
        Err(_) if page.starts_with('/') => Ok(()),
        Err(_) => Err(invalid(
            "page",
            "must be an absolute URL or a path starting with '/'",
        )),
    }
}

fn validate_properties_size(props: &Properties) -> std::result::Result<(), ValidationError> {
    if props.is_empty() {
        return Ok(());
    }

    let size = serde_json::to_vec(props).map(|v| v.len()).unwrap_or(0);
    if size > MAX_PROPERTIES_BYTES {
        let mut err = ValidationError::new("properties_too_large");
        err.message = Some(
            format!(
                "properties {}KB exceeds {}KB limit",
                size / 1024,
                MAX_PROPERTIES_BYTES / 1024
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Event as submitted by a tracking client.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrackEvent {
    #[serde(default)]
    #[validate(length(min = 1, max = 128), custom(function = "validate_website_id"))]
    pub website_id: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub visitor_id: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,

    #[serde(rename = "type", default)]
    pub event_type: EventType,

    #[validate(length(min = 1, max = 100))]
    pub event_name: Option<String>,

    #[serde(default)]
    #[validate(length(min = 1, max = 2048), custom(function = "validate_page"))]
    pub page: String,

    #[validate(length(max = 2048))]
    pub referrer: Option<String>,

    #[validate(length(max = 512))]
    pub user_agent: Option<String>,

    #[validate(nested)]
    pub geo: Option<GeoLocation>,

    #[validate(nested)]
    pub utm: Option<UtmParams>,

    #[validate(range(min = 0.0, max = 86400.0))]
    pub time_on_page: Option<f64>,

    #[serde(default)]
    #[validate(custom(function = "validate_properties_size"))]
    pub properties: Properties,

    /// Unix timestamp in milliseconds; server time when absent
    pub timestamp: Option<i64>,
}

/// Declaration order of validated fields with their wire names.
///
/// Violations are reported for the earliest field in this list.
const FIELD_ORDER: &[(&str, &str)] = &[
    ("website_id", "websiteId"),
    ("visitor_id", "visitorId"),
    ("session_id", "sessionId"),
    ("event_name", "eventName"),
    ("page", "page"),
    ("referrer", "referrer"),
    ("user_agent", "userAgent"),
    ("geo", "geo"),
    ("utm", "utm"),
    ("time_on_page", "timeOnPage"),
    ("properties", "properties"),
];

impl TrackEvent {
    /// Validates the event, returning the first violated field.
    pub fn check(&self, now: DateTime<Utc>) -> Result<()> {
        if let Err(errors) = self.validate() {
            if let Some(err) = first_violation(&errors) {
                return Err(err);
            }
        }

        if self.event_type == EventType::Custom && self.event_name.is_none() {
            return Err(Error::invalid_field(
                "eventName",
                "is required for custom events",
            ));
        }

        if let Some(ms) = self.timestamp {
            let ts = Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| Error::invalid_field("timestamp", "is not a valid Unix time"))?;
            if ts > now + Duration::seconds(MAX_FUTURE_SKEW_SECS) {
                return Err(Error::invalid_field(
                    "timestamp",
                    format!("is more than {}s in the future", MAX_FUTURE_SKEW_SECS),
                ));
            }
        }

        Ok(())
    }

    /// Converts a validated event into an [`Event`] stamped at `received_at`.
    pub fn into_event(self, received_at: DateTime<Utc>) -> Event {
        let timestamp = self
            .timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(received_at);

        Event {
            id: Uuid::new_v4(),
            website_id: self.website_id,
            visitor_id: self.visitor_id,
            session_id: self.session_id,
            event_type: self.event_type,
            event_name: self.event_name,
            page: self.page,
            referrer: self.referrer,
            user_agent: self.user_agent,
            geo: self.geo,
            utm: self.utm,
            time_on_page: self.time_on_page,
            properties: self.properties,
            timestamp,
            received_at,
        }
    }
}

/// Batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackBatch {
    pub events: Vec<TrackEvent>,
}

/// Validates a single submission and converts it.
pub fn accept_event(event: TrackEvent, now: DateTime<Utc>) -> Result<Event> {
    event.check(now)?;
    Ok(event.into_event(now))
}

/// Validates a whole batch; any invalid event rejects all of them.
pub fn accept_batch(batch: TrackBatch, now: DateTime<Utc>) -> Result<Vec<Event>> {
    if batch.events.is_empty() {
        return Err(Error::invalid_field("events", "must contain at least one event"));
    }
    if batch.events.len() > MAX_BATCH_EVENTS {
        return Err(Error::validation(
            ValidationErrorCode::BatchTooLarge,
            "events",
            format!(
                "batch has {} events, exceeds {} limit",
                batch.events.len(),
                MAX_BATCH_EVENTS
            ),
        ));
    }

    for (index, event) in batch.events.iter().enumerate() {
        if let Err(Error::Validation {
            code,
            field,
            message,
        }) = event.check(now)
        {
            return Err(Error::Validation {
                code,
                field: format!("events[{}].{}", index, field),
                message,
            });
        }
    }

    Ok(batch
        .events
        .into_iter()
        .map(|event| event.into_event(now))
        .collect())
}

/// Picks the violation of the earliest declared field.
fn first_violation(errors: &ValidationErrors) -> Option<Error> {
    let all = errors.errors();
    for (name, wire) in FIELD_ORDER {
        let Some(kind) = all.get(*name) else {
            continue;
        };
        return Some(match kind {
            ValidationErrorsKind::Field(list) => {
                let code = if *name == "properties" {
                    ValidationErrorCode::PropertiesTooLarge
                } else {
                    ValidationErrorCode::InvalidField
                };
                let message = list.first().map(describe).unwrap_or_default();
                Error::validation(code, *wire, message)
            }
            ValidationErrorsKind::Struct(nested) => {
                let (field, message) = nested_violation(nested);
                Error::invalid_field(format!("{}.{}", wire, field), message)
            }
            ValidationErrorsKind::List(_) => Error::invalid_field(*wire, "is invalid"),
        });
    }
    None
}

fn nested_violation(errors: &ValidationErrors) -> (String, String) {
    let mut fields: Vec<(String, String)> = errors
        .field_errors()
        .into_iter()
        .map(|(field, list)| {
            (
                field.to_string(),
                list.first().map(describe).unwrap_or_default(),
            )
        })
        .collect();
    fields.sort();
    fields
        .into_iter()
        .next()
        .unwrap_or_else(|| ("?".to_string(), "is invalid".to_string()))
}

fn describe(err: &ValidationError) -> String {
    if let Some(message) = &err.message {
        return message.to_string();
    }
    let param = |key: &str| err.params.get(key).map(|v| v.to_string());
    match err.code.as_ref() {
        "length" => match (param("min"), param("max")) {
            (Some(min), _) if min == "1" && is_empty_value(err) => "is required".to_string(),
            (Some(min), Some(max)) => format!("length must be between {} and {}", min, max),
            (None, Some(max)) => format!("length must be at most {}", max),
            (Some(min), None) => format!("length must be at least {}", min),
            (None, None) => "has an invalid length".to_string(),
        },
        "range" => match (param("min"), param("max")) {
            (Some(min), Some(max)) => format!("must be between {} and {}", min, max),
            _ => "is out of range".to_string(),
        },
        code => format!("is invalid ({})", code),
    }
}

fn is_empty_value(err: &ValidationError) -> bool {
    match err.params.get("value") {
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Null) | None => true,
        _ => false,
    }
}
