//! Directory maintenance (admin only).
//!
//! Workspace and organization records feed the billing entity resolver and
//! the suspension check.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use metering_core::{Organization, Workspace};

use super::{parse_field, parse_optional};
use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Workspace record body.
#[derive(Debug, Deserialize)]
pub struct WorkspaceRequest {
    /// Owning user.
    pub owner_user_id: String,
    /// Organization, once converted.
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Block writes.
    #[serde(default)]
    pub billing_suspended: bool,
}

/// Organization record body.
#[derive(Debug, Deserialize)]
pub struct OrganizationRequest {
    /// Instant from which the organization pays.
    #[serde(default)]
    pub billing_start_at: Option<DateTime<Utc>>,
    /// Block writes for every workspace of the organization.
    #[serde(default)]
    pub billing_suspended: bool,
}

/// Insert or replace a workspace record.
pub async fn put_workspace(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(workspace_id): Path<String>,
    Json(body): Json<WorkspaceRequest>,
) -> Result<Json<Workspace>, ApiError> {
    let workspace = Workspace {
        id: parse_field("workspace_id", &workspace_id)?,
        owner_user_id: parse_field("owner_user_id", &body.owner_user_id)?,
        organization_id: parse_optional("organization_id", body.organization_id.as_deref())?,
        billing_suspended: body.billing_suspended,
    };

    state.engine.put_workspace(&workspace)?;
    tracing::info!(admin_id = %admin.admin_id, workspace_id = %workspace.id, "Workspace saved by admin");
    Ok(Json(workspace))
}

/// Insert or replace an organization record.
pub async fn put_organization(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(organization_id): Path<String>,
    Json(body): Json<OrganizationRequest>,
) -> Result<Json<Organization>, ApiError> {
    let organization = Organization {
        id: parse_field("organization_id", &organization_id)?,
        billing_start_at: body.billing_start_at,
        billing_suspended: body.billing_suspended,
    };

    state.engine.put_organization(&organization)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        organization_id = %organization.id,
        "Organization saved by admin"
    );
    Ok(Json(organization))
}
