//! ClickHouse table schemas.
//!
//! Applied once at startup with `CREATE ... IF NOT EXISTS`. `{db}` is
//! replaced with the configured database name.
//! - DateTime64(3) for millisecond precision
//! - LowCardinality for enum-like fields
//! - JSON property bags stored as text

pub const CREATE_DATABASE: &str = "CREATE DATABASE IF NOT EXISTS {db}";

/// Raw events, one partition per month.
///
/// No row TTL: retention drops whole partitions.
pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.events (
    id String,
    website_id String,
    visitor_id String,
    session_id String,

    event_type LowCardinality(String),
    event_name Nullable(String),
    timestamp DateTime64(3),
    received_at DateTime64(3),

    page String,
    path String,
    referrer Nullable(String),

    -- Client information (woothee enrichment)
    user_agent Nullable(String),
    device_type LowCardinality(String),
    browser LowCardinality(String),
    browser_version String,
    os LowCardinality(String),

    country Nullable(String),
    region Nullable(String),
    city Nullable(String),

    utm_source Nullable(String),
    utm_medium Nullable(String),
    utm_campaign Nullable(String),
    utm_term Nullable(String),
    utm_content Nullable(String),

    time_on_page Nullable(Float64),
    properties String
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(timestamp)
ORDER BY (website_id, timestamp, id)
SETTINGS index_granularity = 8192
"#;

/// Registry of partition ranges accepted for writing.
///
/// Drops are recorded as tombstones (`is_dropped = 1`).
pub const CREATE_PARTITIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.event_partitions (
    table_name String,
    partition_id String,
    range_start DateTime,
    range_end DateTime,
    is_dropped UInt8,
    updated_at DateTime64(3)
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY (table_name, partition_id)
"#;

pub const CREATE_FUNNELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.funnels (
    id String,
    website_id String,
    name String,
    active UInt8,
    updated_at DateTime64(3)
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY (website_id, id)
"#;

pub const CREATE_FUNNEL_STEPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.funnel_steps (
    id String,
    funnel_id String,
    name String,
    step_type LowCardinality(String),
    step_order UInt32,
    page_path Nullable(String),
    event_name Nullable(String),
    property_key Nullable(String),
    property_value Nullable(String),
    updated_at DateTime64(3)
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY (funnel_id, step_order)
"#;

/// Latest progress per visitor and funnel.
pub const CREATE_FUNNEL_PROGRESS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.funnel_progress (
    website_id String,
    funnel_id String,
    visitor_id String,
    session_id String,
    current_step UInt32,
    completed_steps Array(UInt32),
    first_seen DateTime64(3),
    last_activity DateTime64(3),
    converted UInt8,
    converted_at Nullable(DateTime64(3)),
    properties String,
    updated_at DateTime64(3)
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY (website_id, funnel_id, visitor_id)
"#;

/// One row per completed step.
pub const CREATE_FUNNEL_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.funnel_events (
    website_id String,
    funnel_id String,
    step_id String,
    step_position UInt32,
    visitor_id String,
    session_id String,
    event_id String,
    timestamp DateTime64(3)
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(timestamp)
ORDER BY (website_id, funnel_id, timestamp)
"#;

/// Daily starts and conversions, summed on merge.
pub const CREATE_FUNNEL_ANALYTICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.funnel_analytics (
    website_id String,
    funnel_id String,
    day Date,
    starts UInt64,
    conversions UInt64,
    time_to_convert_ms UInt64
)
ENGINE = SummingMergeTree((starts, conversions, time_to_convert_ms))
ORDER BY (website_id, funnel_id, day)
"#;

/// All DDL statements for `database`, in creation order.
pub fn all_tables(database: &str) -> Vec<String> {
    [
        CREATE_DATABASE,
        CREATE_EVENTS_TABLE,
        CREATE_PARTITIONS_TABLE,
        CREATE_FUNNELS_TABLE,
        CREATE_FUNNEL_STEPS_TABLE,
        CREATE_FUNNEL_PROGRESS_TABLE,
        CREATE_FUNNEL_EVENTS_TABLE,
        CREATE_FUNNEL_ANALYTICS_TABLE,
    ]
    .iter()
    .map(|ddl| ddl.replace("{db}", database))
    .collect()
}
