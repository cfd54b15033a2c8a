//! Unified error types for the clickstream engine.
//!
//! Error codes:
//! - VALID_001-003: Validation errors (rejected before buffering)
//! - BUF_001-002: Buffer backpressure and shutdown
//! - DB_001-002: Storage write errors
//! - FUNNEL_001: Funnel definition lookup errors
//! - QUOTA_001: Subscription quota denial

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorCode {
    /// VALID_001: Malformed payload or invalid field
    InvalidField,
    /// VALID_002: Batch exceeds the event or byte limit
    BatchTooLarge,
    /// VALID_003: Property bag exceeds the size limit
    PropertiesTooLarge,
}

impl ValidationErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidField => "VALID_001",
            Self::BatchTooLarge => "VALID_002",
            Self::PropertiesTooLarge => "VALID_003",
        }
    }
}

/// Unified error type for the clickstream engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, rejected synchronously and never retried.
    #[error("[{code}] {field}: {message}")]
    Validation {
        code: &'static str,
        field: String,
        message: String,
    },

    /// The buffer has reached its pending limit; the caller should retry or drop.
    #[error("[BUF_001] buffer full: {pending} events pending, limit {capacity}")]
    BufferFull { pending: usize, capacity: usize },

    /// The buffer is draining for shutdown and accepts no new events.
    #[error("[BUF_002] buffer is closed for shutdown")]
    BufferClosed,

    /// Whole-batch storage failure (transient, retried inside flush).
    #[error("[DB_001] storage write failed: {0}")]
    StorageWrite(String),

    /// No partition covers the row's timestamp.
    #[error("[DB_002] no partition of table {table} covers {timestamp}")]
    PartitionGap {
        table: String,
        timestamp: DateTime<Utc>,
    },

    /// Funnel definitions could not be loaded or compiled.
    #[error("[FUNNEL_001] funnel lookup failed: {0}")]
    FunnelLookup(String),

    /// The subscription service denied ingestion for the website.
    #[error("[QUOTA_001] {0}")]
    QuotaDenied(String),

    #[error("shutdown timed out after {0:?} with the final flush still in flight")]
    ShutdownTimeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error for a specific field.
    pub fn validation(
        code: ValidationErrorCode,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            code: code.code(),
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-field validation error.
    pub fn invalid_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::validation(ValidationErrorCode::InvalidField, field, msg)
    }

    pub fn buffer_full(pending: usize, capacity: usize) -> Self {
        Self::BufferFull { pending, capacity }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageWrite(msg.into())
    }

    pub fn partition_gap(table: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::PartitionGap {
            table: table.into(),
            timestamp,
        }
    }

    pub fn funnel_lookup(msg: impl Into<String>) -> Self {
        Self::FunnelLookup(msg.into())
    }

    pub fn quota_denied(msg: impl Into<String>) -> Self {
        Self::QuotaDenied(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error marks a row that no partition covers.
    pub fn is_partition_gap(&self) -> bool {
        matches!(self, Self::PartitionGap { .. })
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Serialization(_) => 400,
            Self::QuotaDenied(_) => 403,
            Self::BufferFull { .. } => 503,
            Self::BufferClosed => 503,
            Self::StorageWrite(_) => 500,
            Self::PartitionGap { .. } => 500,
            Self::FunnelLookup(_) => 500,
            Self::ShutdownTimeout(_) => 500,
            Self::Config(_) => 500,
            Self::Internal(_) => 500,
        }
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Validation { code, .. } => Some(code),
            Self::BufferFull { .. } => Some("BUF_001"),
            Self::BufferClosed => Some("BUF_002"),
            Self::StorageWrite(_) => Some("DB_001"),
            Self::PartitionGap { .. } => Some("DB_002"),
            Self::FunnelLookup(_) => Some("FUNNEL_001"),
            Self::QuotaDenied(_) => Some("QUOTA_001"),
            _ => None,
        }
    }
}
