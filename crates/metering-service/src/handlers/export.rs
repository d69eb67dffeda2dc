//! Event export handler.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use metering_core::{ExportFilter, ExportFormat, WorkspaceId};

use super::{parse_field, parse_optional};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Export query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    /// `csv` (default) or `json`.
    pub format: Option<String>,
    /// Inclusive lower bound (RFC 3339).
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound (RFC 3339).
    pub to: Option<DateTime<Utc>>,
    /// Only this resource.
    pub resource_type: Option<String>,
    /// Only this project.
    pub project_id: Option<String>,
}

/// Download ledger events as an attachment.
pub async fn export_events(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(workspace_id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let workspace_id: WorkspaceId = parse_field("workspace_id", &workspace_id)?;
    let format: ExportFormat =
        parse_optional("format", query.format.as_deref())?.unwrap_or_default();
    let filter = ExportFilter {
        from: query.from,
        to: query.to,
        resource_type: parse_optional("resource_type", query.resource_type.as_deref())?,
        project_id: parse_optional("project_id", query.project_id.as_deref())?,
    };

    let body = state
        .engine
        .export_events(&auth.context(), workspace_id, &filter, format)
        .await?;

    let disposition = format!(
        "attachment; filename=\"events-{workspace_id}.{}\"",
        format.extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
