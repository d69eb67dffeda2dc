//! Ledger export as CSV or JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use csv::Writer;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{BillingError, ProjectId, ResourceType, UsageEvent};

/// Output format of an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated with a header row.
    #[default]
    Csv,
    /// JSON array of events.
    Json,
}

impl ExportFormat {
    /// MIME type of the encoded body.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }

    /// File extension.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(BillingError::Validation(format!(
                "unknown export format: {other}"
            ))),
        }
    }
}

/// Which ledger events to export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFilter {
    /// Inclusive lower bound on the usage timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the usage timestamp.
    pub to: Option<DateTime<Utc>>,
    /// Only this resource.
    pub resource_type: Option<ResourceType>,
    /// Only this project.
    pub project_id: Option<ProjectId>,
}

impl ExportFilter {
    /// Whether an event passes the filter.
    #[must_use]
    pub fn matches(&self, event: &UsageEvent) -> bool {
        self.from.map_or(true, |from| event.timestamp >= from)
            && self.to.map_or(true, |to| event.timestamp < to)
            && self
                .resource_type
                .map_or(true, |rt| rt == event.resource_type)
            && self
                .project_id
                .map_or(true, |p| event.project_id == Some(p))
    }
}

/// One CSV line; field order is the column order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventRow<'a> {
    id: String,
    workspace_id: String,
    project_id: String,
    resource_type: &'static str,
    units: f64,
    source: &'static str,
    timestamp: String,
    metadata: &'a str,
}

/// Encode events as CSV.
///
/// Columns: `id, workspaceId, projectId, resourceType, units, source,
/// timestamp, metadata`. Metadata is embedded as a JSON string.
///
/// # Errors
///
/// Returns `BillingError::Serialization` if a row cannot be written.
pub fn events_to_csv(events: &[UsageEvent]) -> crate::Result<Vec<u8>> {
    let mut wtr = Writer::from_writer(vec![]);

    for event in events {
        let metadata = if event.metadata.is_null() {
            String::new()
        } else {
            serde_json::to_string(&event.metadata)
                .map_err(|e| BillingError::Serialization(e.to_string()))?
        };
        let row = EventRow {
            id: event.id.to_string(),
            workspace_id: event.workspace_id.to_string(),
            project_id: event
                .project_id
                .map_or_else(String::new, |p| p.to_string()),
            resource_type: event.resource_type.as_str(),
            units: event.units,
            source: event.source.as_str(),
            timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            metadata: &metadata,
        };
        wtr.serialize(&row)
            .map_err(|e| BillingError::Serialization(e.to_string()))?;
    }

    // An empty export still carries the header row.
    if events.is_empty() {
        wtr.write_record([
            "id",
            "workspaceId",
            "projectId",
            "resourceType",
            "units",
            "source",
            "timestamp",
            "metadata",
        ])
        .map_err(|e| BillingError::Serialization(e.to_string()))?;
    }

    wtr.into_inner()
        .map_err(|e| BillingError::Serialization(e.to_string()))
}

/// Encode events as a JSON array.
///
/// # Errors
///
/// Returns `BillingError::Serialization` if encoding fails.
pub fn events_to_json(events: &[UsageEvent]) -> crate::Result<Vec<u8>> {
    serde_json::to_vec(events).map_err(|e| BillingError::Serialization(e.to_string()))
}

/// Encode events in the requested format.
///
/// # Errors
///
/// Returns `BillingError::Serialization` if encoding fails.
pub fn encode(events: &[UsageEvent], format: ExportFormat) -> crate::Result<Vec<u8>> {
    match format {
        ExportFormat::Csv => events_to_csv(events),
        ExportFormat::Json => events_to_json(events),
    }
}
