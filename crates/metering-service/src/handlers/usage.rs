//! Usage event handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use metering_core::{NewUsageEvent, UsageEvent};

use super::{parse_field, parse_optional};
use crate::auth::ServiceAuth;
use crate::engine::IngestOutcome;
use crate::error::ApiError;
use crate::state::AppState;

/// Maximum number of events in one batch request.
pub const MAX_BATCH_EVENTS: usize = 1000;

/// Usage event request from producers.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageRequest {
    /// Workspace that consumed the resource.
    pub workspace_id: String,
    /// Project inside the workspace.
    #[serde(default)]
    pub project_id: Option<String>,
    /// `traffic`, `storage` or `compute`.
    pub resource_type: String,
    /// Bytes for traffic/storage, base count for compute.
    pub units: f64,
    /// Compute base count (defaults to `units`).
    #[serde(default)]
    pub base_units: Option<f64>,
    /// Compute job type for weighting.
    #[serde(default)]
    pub job_type: Option<String>,
    /// Key identifying one logical operation.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// When the usage occurred (defaults to now).
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// `api`, `file`, `job` or `ai`.
    pub source: String,
    /// Additional metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl UsageRequest {
    fn into_new_event(self) -> Result<NewUsageEvent, ApiError> {
        Ok(NewUsageEvent {
            workspace_id: parse_field("workspace_id", &self.workspace_id)?,
            project_id: parse_optional("project_id", self.project_id.as_deref())?,
            resource_type: parse_field("resource_type", &self.resource_type)?,
            units: self.units,
            base_units: self.base_units,
            job_type: self.job_type,
            idempotency_key: self.idempotency_key,
            timestamp: self.timestamp,
            source: parse_field("source", &self.source)?,
            metadata: self.metadata,
        })
    }
}

/// Usage response.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// The stored event.
    pub event: UsageEvent,
    /// `true` if the idempotency key had been seen before and nothing was
    /// written.
    pub duplicate: bool,
}

impl From<IngestOutcome> for UsageResponse {
    fn from(outcome: IngestOutcome) -> Self {
        Self {
            event: outcome.event,
            duplicate: !outcome.created,
        }
    }
}

/// Report a single usage event.
///
/// Returns 201 when the event was written, 200 for a duplicate.
pub async fn report_usage(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<UsageRequest>,
) -> Result<(StatusCode, Json<UsageResponse>), ApiError> {
    let new = body.into_new_event()?;
    let ctx = auth.context();

    let outcome = state.engine.record_usage(&ctx, new).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(outcome.into())))
}

/// Batch usage request.
#[derive(Debug, Deserialize)]
pub struct BatchUsageRequest {
    /// List of usage events.
    pub events: Vec<UsageRequest>,
}

/// Batch usage response.
#[derive(Debug, Serialize)]
pub struct BatchUsageResponse {
    /// Results for each event, in request order.
    pub results: Vec<BatchUsageResult>,
    /// Events stored or recognised as duplicates.
    pub processed: usize,
    /// Events rejected.
    pub failed: usize,
}

/// Result for a single event in batch.
#[derive(Debug, Serialize)]
pub struct BatchUsageResult {
    /// Position in the request.
    pub index: usize,
    /// Whether successful.
    pub success: bool,
    /// Stored event id (if successful).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Whether the event was a duplicate (if successful).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    /// Error message if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchUsageResult {
    fn ok(index: usize, outcome: &IngestOutcome) -> Self {
        Self {
            index,
            success: true,
            event_id: Some(outcome.event.id.to_string()),
            duplicate: Some(!outcome.created),
            error: None,
        }
    }

    fn failed(index: usize, error: impl ToString) -> Self {
        Self {
            index,
            success: false,
            event_id: None,
            duplicate: None,
            error: Some(error.to_string()),
        }
    }
}

/// Report multiple usage events. Each event succeeds or fails on its own.
pub async fn report_usage_batch(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<BatchUsageRequest>,
) -> Result<Json<BatchUsageResponse>, ApiError> {
    if body.events.len() > MAX_BATCH_EVENTS {
        return Err(ApiError::BadRequest(format!(
            "batch exceeds {MAX_BATCH_EVENTS} events"
        )));
    }

    // One context for the whole batch: oracle decisions and directory
    // lookups are shared between its events.
    let ctx = auth.context();
    let mut results = Vec::with_capacity(body.events.len());
    let mut accepted = Vec::with_capacity(body.events.len());
    let mut events = Vec::with_capacity(body.events.len());

    for (index, request) in body.events.into_iter().enumerate() {
        match request.into_new_event() {
            Ok(new) => {
                accepted.push(index);
                events.push(new);
            }
            Err(e) => results.push(BatchUsageResult::failed(index, e)),
        }
    }

    let outcomes = state.engine.record_usage_batch(&ctx, events).await;
    for (index, outcome) in accepted.into_iter().zip(outcomes) {
        results.push(match outcome {
            Ok(outcome) => BatchUsageResult::ok(index, &outcome),
            Err(e) => BatchUsageResult::failed(index, e),
        });
    }
    results.sort_by_key(|r| r.index);

    let failed = results.iter().filter(|r| !r.success).count();
    tracing::debug!(
        caller = %ctx.caller(),
        total = results.len(),
        failed,
        "Usage batch processed"
    );

    Ok(Json(BatchUsageResponse {
        processed: results.len() - failed,
        failed,
        results,
    }))
}
