//! Alert handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use metering_core::{AlertDefinition, AlertId, AlertUpdate, CurrentUsage, FiredAlert, NewAlert, WorkspaceId};

use super::parse_field;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Alert list response.
#[derive(Debug, Serialize)]
pub struct AlertListResponse {
    /// Alerts of the workspace.
    pub alerts: Vec<AlertDefinition>,
}

/// Evaluation response.
#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    /// Alerts that fired on this evaluation.
    pub fired: Vec<FiredAlert>,
}

fn parse_ids(workspace_id: &str, alert_id: &str) -> Result<(WorkspaceId, AlertId), ApiError> {
    Ok((
        parse_field("workspace_id", workspace_id)?,
        parse_field("alert_id", alert_id)?,
    ))
}

/// Create an alert.
pub async fn create_alert(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(workspace_id): Path<String>,
    Json(body): Json<NewAlert>,
) -> Result<(StatusCode, Json<AlertDefinition>), ApiError> {
    let workspace_id = parse_field("workspace_id", &workspace_id)?;
    let alert = state
        .engine
        .create_alert(&auth.context(), workspace_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

/// List alerts.
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(workspace_id): Path<String>,
) -> Result<Json<AlertListResponse>, ApiError> {
    let workspace_id = parse_field("workspace_id", &workspace_id)?;
    let alerts = state
        .engine
        .list_alerts(&auth.context(), workspace_id)
        .await?;
    Ok(Json(AlertListResponse { alerts }))
}

/// Get one alert.
pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path((workspace_id, alert_id)): Path<(String, String)>,
) -> Result<Json<AlertDefinition>, ApiError> {
    let (workspace_id, alert_id) = parse_ids(&workspace_id, &alert_id)?;
    let alert = state
        .engine
        .get_alert(&auth.context(), workspace_id, alert_id)
        .await?;
    Ok(Json(alert))
}

/// Partially update an alert.
pub async fn update_alert(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path((workspace_id, alert_id)): Path<(String, String)>,
    Json(body): Json<AlertUpdate>,
) -> Result<Json<AlertDefinition>, ApiError> {
    let (workspace_id, alert_id) = parse_ids(&workspace_id, &alert_id)?;
    let alert = state
        .engine
        .update_alert(&auth.context(), workspace_id, alert_id, body)
        .await?;
    Ok(Json(alert))
}

/// Delete an alert.
pub async fn delete_alert(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path((workspace_id, alert_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let (workspace_id, alert_id) = parse_ids(&workspace_id, &alert_id)?;
    state
        .engine
        .delete_alert(&auth.context(), workspace_id, alert_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Evaluate alerts. The body (current usage) is optional.
pub async fn evaluate_alerts(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(workspace_id): Path<String>,
    body: Option<Json<CurrentUsage>>,
) -> Result<Json<EvaluateResponse>, ApiError> {
    let workspace_id = parse_field("workspace_id", &workspace_id)?;
    let usage = body.map(|Json(usage)| usage);
    let fired = state
        .engine
        .evaluate_alerts(&auth.context(), workspace_id, usage)
        .await?;
    Ok(Json(EvaluateResponse { fired }))
}
