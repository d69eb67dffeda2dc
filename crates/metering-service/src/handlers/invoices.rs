//! Invoice handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use metering_core::{Invoice, InvoiceId, WorkspaceId};

use super::{parse_field, parse_optional};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Invoice generation request.
#[derive(Debug, Deserialize)]
pub struct GenerateInvoiceRequest {
    /// `YYYY-MM`.
    pub period: String,
    /// Invoice only the usage billed to this entity.
    #[serde(default)]
    pub billing_entity_id: Option<String>,
}

/// Invoice list response.
#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    /// Invoices, oldest first.
    pub invoices: Vec<Invoice>,
}

/// Generate a draft invoice and lock the period.
pub async fn generate_invoice(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(workspace_id): Path<String>,
    Json(body): Json<GenerateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), ApiError> {
    let workspace_id: WorkspaceId = parse_field("workspace_id", &workspace_id)?;
    let period = parse_field("period", &body.period)?;
    let entity = parse_optional("billing_entity_id", body.billing_entity_id.as_deref())?;

    let invoice = state
        .engine
        .generate_invoice(&auth.context(), workspace_id, period, entity)
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

/// List a workspace's invoices.
pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(workspace_id): Path<String>,
) -> Result<Json<InvoiceListResponse>, ApiError> {
    let workspace_id = parse_field("workspace_id", &workspace_id)?;
    let invoices = state
        .engine
        .list_invoices(&auth.context(), workspace_id)
        .await?;
    Ok(Json(InvoiceListResponse { invoices }))
}

/// Get one invoice.
pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(invoice_id): Path<String>,
) -> Result<Json<Invoice>, ApiError> {
    let invoice_id: InvoiceId = parse_field("invoice_id", &invoice_id)?;
    let invoice = state.engine.get_invoice(&auth.context(), &invoice_id).await?;
    Ok(Json(invoice))
}

/// Issue a draft invoice.
pub async fn finalize_invoice(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(invoice_id): Path<String>,
) -> Result<Json<Invoice>, ApiError> {
    let invoice_id: InvoiceId = parse_field("invoice_id", &invoice_id)?;
    let invoice = state
        .engine
        .finalize_invoice(&auth.context(), &invoice_id)
        .await?;
    Ok(Json(invoice))
}

/// Mark a finalized invoice paid.
pub async fn pay_invoice(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(invoice_id): Path<String>,
) -> Result<Json<Invoice>, ApiError> {
    let invoice_id: InvoiceId = parse_field("invoice_id", &invoice_id)?;
    let invoice = state.engine.pay_invoice(&auth.context(), &invoice_id).await?;
    Ok(Json(invoice))
}
