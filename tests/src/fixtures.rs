//! Test fixtures and event generators.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

pub const SITE: &str = "site-test";

/// A valid pageview as a tracking client would send it.
pub fn pageview(visitor: &str, session: &str, page: &str) -> Value {
    json!({
        "websiteId": SITE,
        "visitorId": visitor,
        "sessionId": session,
        "type": "pageview",
        "page": page,
        "userAgent": "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
        "timestamp": Utc::now().timestamp_millis()
    })
}

/// A valid custom event.
pub fn custom_event(visitor: &str, session: &str, page: &str, name: &str) -> Value {
    let mut event = pageview(visitor, session, page);
    event["type"] = json!("custom");
    event["eventName"] = json!(name);
    event
}

/// Overrides the client timestamp of an event.
pub fn at(mut event: Value, timestamp: DateTime<Utc>) -> Value {
    event["timestamp"] = json!(timestamp.timestamp_millis());
    event
}

/// Adds a property to an event.
pub fn with_property(mut event: Value, key: &str, value: Value) -> Value {
    event["properties"][key] = value;
    event
}

/// Wraps events in the batch envelope.
pub fn batch(events: Vec<Value>) -> Value {
    json!({ "events": events })
}

/// `n` pageviews spread round-robin over `visitors`, each carrying its
/// per-visitor sequence number in `properties.seq`.
pub fn interleaved_pageviews(n: usize, visitors: &[&str]) -> Vec<Value> {
    (0..n)
        .map(|i| {
            let visitor = visitors[i % visitors.len()];
            let seq = i / visitors.len();
            with_property(
                pageview(visitor, "session-1", &format!("/page/{}", seq)),
                "seq",
                json!(seq),
            )
        })
        .collect()
}

/// A batch that exceeds the event limit.
pub fn oversized_batch() -> Value {
    batch((0..1001).map(|i| pageview(&format!("v{}", i), "s", "/")).collect())
}
