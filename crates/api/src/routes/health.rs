//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};
use telemetry::health;

use crate::response::HealthResponse;
use crate::state::AppState;

/// GET /health - Full health check.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = health().report();

    Json(HealthResponse {
        status: report.status,
        storage_connected: health().storage.is_up(),
        buffer_open: !state.buffer.is_closed(),
        buffer_depth: state.buffer.pending(),
        report,
    })
}

/// GET /health/ready - Ready while the buffer accepts events.
pub async fn ready_handler(State(state): State<AppState>) -> StatusCode {
    if state.buffer.is_closed() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// GET /health/live - Liveness check (service is running).
pub async fn live_handler() -> StatusCode {
    StatusCode::OK
}
