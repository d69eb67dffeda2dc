//! Storage snapshot handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use metering_core::StorageDailySnapshot;

use super::{parse_field, parse_optional};
use crate::auth::ServiceAuth;
use crate::engine::NewStorageSnapshot;
use crate::error::ApiError;
use crate::state::AppState;

/// Daily storage snapshot request.
#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    /// Project, for per-project series.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Gigabytes held.
    pub storage_gb: f64,
    /// UTC day observed (`YYYY-MM-DD`).
    pub date: NaiveDate,
}

/// Record the storage held on one day, replacing any earlier value.
pub async fn put_snapshot(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(workspace_id): Path<String>,
    Json(body): Json<SnapshotRequest>,
) -> Result<Json<StorageDailySnapshot>, ApiError> {
    let new = NewStorageSnapshot {
        workspace_id: parse_field("workspace_id", &workspace_id)?,
        project_id: parse_optional("project_id", body.project_id.as_deref())?,
        storage_gb: body.storage_gb,
        date: body.date,
    };

    let snapshot = state
        .engine
        .record_storage_snapshot(&auth.context(), new)
        .await?;
    Ok(Json(snapshot))
}
