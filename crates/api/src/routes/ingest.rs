//! Ingestion endpoint handlers.
//!
//! Both endpoints validate the whole payload before anything is enqueued,
//! then check the subscription quota of every website involved.

use std::collections::BTreeSet;
use std::time::Instant;

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use chrono::Utc;
use engine_core::{
    accept_batch, accept_event,
    limits::MAX_BATCH_SIZE_BYTES,
    Error, Event, QuotaDecision, TrackBatch, TrackEvent, ValidationErrorCode,
};
use serde::de::DeserializeOwned;
use telemetry::metrics;
use tracing::{debug, info, warn};

use crate::response::{ApiError, IngestResponse};
use crate::state::AppState;

/// POST /api/events - Single event.
pub async fn event_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let start = Instant::now();
    metrics().ingest.requests.inc();

    let payload: TrackEvent = parse_body(&body)?;
    metrics().ingest.events_received.inc();

    let event = accept_event(payload, Utc::now()).inspect_err(|_| {
        metrics().ingest.events_invalid.inc();
    })?;

    check_quota(&state, std::iter::once(event.website_id.as_str())).await?;
    enqueue(&state, vec![event], start)
}

/// POST /api/events/batch - Up to 1000 events; all or nothing.
pub async fn batch_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let start = Instant::now();
    metrics().ingest.requests.inc();

    let payload: TrackBatch = parse_body(&body)?;
    let total = payload.events.len();
    metrics().ingest.events_received.inc_by(total as u64);

    let events = accept_batch(payload, Utc::now()).map_err(|e| {
        metrics().ingest.events_invalid.inc_by(total as u64);
        warn!(events = total, error = %e, "Rejected invalid batch");
        e
    })?;

    let websites: BTreeSet<&str> = events.iter().map(|e| e.website_id.as_str()).collect();
    check_quota(&state, websites.into_iter()).await?;
    enqueue(&state, events, start)
}

/// Parses a JSON body after the size check.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    if body.len() > MAX_BATCH_SIZE_BYTES {
        return Err(Error::validation(
            ValidationErrorCode::BatchTooLarge,
            "body",
            format!(
                "payload size {}KB exceeds {}KB limit",
                body.len() / 1024,
                MAX_BATCH_SIZE_BYTES / 1024
            ),
        )
        .into());
    }

    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Malformed ingestion payload");
        ApiError::bad_request("body", e.to_string())
    })
}

async fn check_quota<'a>(
    state: &AppState,
    websites: impl Iterator<Item = &'a str>,
) -> Result<(), ApiError> {
    for website_id in websites {
        let (allowed, decision) = state.quota_allows(website_id).await;
        if decision == QuotaDecision::Unknown {
            metrics().ingest.quota_unknown.inc();
            warn!(website_id = website_id, allowed = allowed, "Quota unknown, applying policy");
        }
        if allowed {
            continue;
        }

        metrics().ingest.quota_denied.inc();
        let reason = match decision {
            QuotaDecision::Denied { reason } => reason,
            _ => "quota service unavailable".to_string(),
        };
        info!(website_id = website_id, reason = %reason, "Ingestion denied by quota");
        return Err(Error::quota_denied(format!("website {}: {}", website_id, reason)).into());
    }
    Ok(())
}

fn enqueue(
    state: &AppState,
    events: Vec<Event>,
    start: Instant,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let accepted = events.len();

    state.buffer.enqueue_batch(events).map_err(|e| {
        warn!(events = accepted, error = %e, "Buffer refused events");
        e
    })?;

    let latency_ms = start.elapsed().as_millis() as u64;
    metrics().ingest.latency_ms.observe(latency_ms);
    debug!(accepted = accepted, latency_ms = latency_ms, "Events queued");

    Ok((StatusCode::ACCEPTED, Json(IngestResponse::success(accepted))))
}
