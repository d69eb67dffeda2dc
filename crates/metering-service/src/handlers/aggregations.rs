//! Aggregation handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use metering_core::{BillingEntityId, BillingPeriod, UsageAggregation, WorkspaceId};

use super::{parse_field, parse_optional};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Optional billing entity filter.
#[derive(Debug, Default, Deserialize)]
pub struct EntityQuery {
    /// Only usage billed to this user or organization.
    pub billing_entity_id: Option<String>,
}

fn parse_key(
    workspace_id: &str,
    period: &str,
    query: &EntityQuery,
) -> Result<(WorkspaceId, BillingPeriod, Option<BillingEntityId>), ApiError> {
    Ok((
        parse_field("workspace_id", workspace_id)?,
        parse_field("period", period)?,
        parse_optional("billing_entity_id", query.billing_entity_id.as_deref())?,
    ))
}

/// Recompute the aggregation of a period.
pub async fn calculate_aggregation(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path((workspace_id, period)): Path<(String, String)>,
    Query(query): Query<EntityQuery>,
) -> Result<Json<UsageAggregation>, ApiError> {
    let (workspace_id, period, entity) = parse_key(&workspace_id, &period, &query)?;
    let aggregation = state
        .engine
        .calculate_aggregation(&auth.context(), workspace_id, period, entity)
        .await?;
    Ok(Json(aggregation))
}

/// Read the stored aggregation of a period.
pub async fn get_aggregation(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path((workspace_id, period)): Path<(String, String)>,
    Query(query): Query<EntityQuery>,
) -> Result<Json<UsageAggregation>, ApiError> {
    let (workspace_id, period, entity) = parse_key(&workspace_id, &period, &query)?;
    let aggregation = state
        .engine
        .get_aggregation(&auth.context(), workspace_id, period, entity)
        .await?;
    Ok(Json(aggregation))
}
