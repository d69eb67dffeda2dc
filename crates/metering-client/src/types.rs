//! Request and response types for the metering client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use metering_core::{
    BillingEntityId, BillingPeriod, Invoice, ProjectId, ResourceType, UsageEvent, UsageSource,
    WorkspaceId,
};

/// Usage event request.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRequest {
    /// Workspace that consumed the resource.
    pub workspace_id: WorkspaceId,
    /// Project inside the workspace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    /// Resource consumed.
    pub resource_type: ResourceType,
    /// Bytes for traffic and storage, base count for compute.
    pub units: f64,
    /// Compute base count (defaults to `units` on the server).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_units: Option<f64>,
    /// Compute job type for weighting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    /// Key identifying one logical operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// When the usage occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Producer category.
    pub source: UsageSource,
    /// Additional metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl UsageRequest {
    /// Create a request with only the required fields.
    #[must_use]
    pub const fn new(
        workspace_id: WorkspaceId,
        resource_type: ResourceType,
        units: f64,
        source: UsageSource,
    ) -> Self {
        Self {
            workspace_id,
            project_id: None,
            resource_type,
            units,
            base_units: None,
            job_type: None,
            idempotency_key: None,
            timestamp: None,
            source,
            metadata: None,
        }
    }

    /// Set the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Pin the usage timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the compute job type.
    #[must_use]
    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }
}

/// Usage response.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageResponse {
    /// The stored event (the original one for duplicates).
    pub event: UsageEvent,
    /// Whether the idempotency key had been seen before.
    pub duplicate: bool,
}

/// Batch usage request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchUsageRequest {
    /// Events to report.
    pub events: Vec<UsageRequest>,
}

/// Batch usage response.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchUsageResponse {
    /// Results for each event, in request order.
    pub results: Vec<BatchUsageResult>,
    /// Events stored or recognised as duplicates.
    pub processed: usize,
    /// Events rejected.
    pub failed: usize,
}

/// Result for a single event in batch.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchUsageResult {
    /// Position in the request.
    pub index: usize,
    /// Whether successful.
    pub success: bool,
    /// Stored event id.
    #[serde(default)]
    pub event_id: Option<String>,
    /// Whether the event was a duplicate.
    #[serde(default)]
    pub duplicate: Option<bool>,
    /// Error message if failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// Invoice generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateInvoiceRequest {
    /// Month to invoice.
    pub period: BillingPeriod,
    /// Billing entity slice, when the month is split.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_entity_id: Option<BillingEntityId>,
}

/// Invoice list response.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceListResponse {
    /// Invoices of the workspace.
    pub invoices: Vec<Invoice>,
}

/// API error response structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}

impl ApiErrorBody {
    /// String field of `details`, empty if absent.
    #[must_use]
    pub fn detail(&self, field: &str) -> String {
        self.details
            .as_ref()
            .and_then(|d| d.get(field))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}
