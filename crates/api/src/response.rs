//! Standardized API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use telemetry::{HealthReport, HealthStatus};

/// Seconds a client should wait before retrying after backpressure.
const BACKPRESSURE_RETRY_AFTER_SECS: u64 = 1;

/// Success response for ingestion.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    /// Events queued for storage
    pub received: usize,
    pub timestamp: i64,
}

impl IngestResponse {
    pub fn success(received: usize) -> Self {
        Self {
            success: true,
            received,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub storage_connected: bool,
    pub buffer_open: bool,
    pub buffer_depth: usize,
    pub report: HealthReport,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// First violated field for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// API error type with error codes.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
            retry_after: None,
        }
    }

    pub fn bad_request(field: impl Into<String>, msg: impl Into<String>) -> Self {
        let mut err = Self::with_code(StatusCode::BAD_REQUEST, "VALID_001", msg);
        err.response = err.response.with_field(field);
        err
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::FORBIDDEN, "QUOTA_001", msg)
    }

    pub fn unavailable(code: impl Into<String>, msg: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            response: ErrorResponse::new(msg, code),
            retry_after,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.response)).into_response();

        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

impl From<engine_core::Error> for ApiError {
    fn from(err: engine_core::Error) -> Self {
        use engine_core::Error;

        match err {
            Error::Validation {
                code,
                field,
                message,
            } => {
                let mut api = ApiError::with_code(StatusCode::BAD_REQUEST, code, message);
                api.response = api.response.with_field(field);
                api
            }
            Error::Serialization(e) => ApiError::bad_request("body", e.to_string()),
            full @ Error::BufferFull { .. } => ApiError::unavailable(
                "BUF_001",
                full.to_string(),
                Some(BACKPRESSURE_RETRY_AFTER_SECS),
            ),
            closed @ Error::BufferClosed => {
                ApiError::unavailable("BUF_002", closed.to_string(), None)
            }
            Error::QuotaDenied(reason) => ApiError::forbidden(reason),
            other => {
                let status = StatusCode::from_u16(other.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let code = other.error_code().unwrap_or("INTERNAL");
                ApiError::with_code(status, code, other.to_string())
            }
        }
    }
}
