//! Size and range limits for ingested events.
//!
//! The `#[validate]` derive macro requires literal values in attributes,
//! so field limits are duplicated there. A test in `events` fails when the
//! two drift apart.

// === Batch Limits ===

/// Maximum request payload size in bytes (1MB).
pub const MAX_BATCH_SIZE_BYTES: usize = 1024 * 1024;

/// Maximum events per batch submission.
pub const MAX_BATCH_EVENTS: usize = 1000;

// === Property Bag Limits ===

/// Maximum serialized property bag size in bytes (16KB).
pub const MAX_PROPERTIES_BYTES: usize = 16 * 1024;

// === String Field Limits (chars) ===

/// Website, visitor and session identifiers.
pub const MAX_ID_LEN: usize = 128;

/// Page and referrer URLs.
pub const MAX_URL_LEN: usize = 2048;

/// Browser user agents; 500+ with extensions.
pub const MAX_USER_AGENT_LEN: usize = 512;

/// Custom event names.
pub const MAX_EVENT_NAME_LEN: usize = 100;

/// UTM parameter values.
pub const MAX_UTM_LEN: usize = 256;

/// Geolocation names (country code, region, city).
pub const MAX_GEO_LEN: usize = 128;

// === Numeric Bounds ===

/// Time on page upper bound in seconds (24 hours).
pub const MAX_TIME_ON_PAGE_SECS: f64 = 86_400.0;

// === Timestamp Bounds ===

/// Maximum allowed clock skew for client timestamps in the future (seconds).
pub const MAX_FUTURE_SKEW_SECS: i64 = 300;
