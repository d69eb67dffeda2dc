//! Usage event types.
//!
//! Producers report resource consumption as usage events. Events are stamped
//! with their billing entity once, at ingestion, and are never modified
//! afterwards.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{BillingEntityId, EventId, ProjectId, WorkspaceId};

/// Bytes in one billed gigabyte (binary, 1 GiB).
pub const BYTES_PER_GB: f64 = 1_073_741_824.0;

/// Convert a byte count to billed gigabytes.
#[must_use]
pub fn bytes_to_gb(bytes: f64) -> f64 {
    bytes / BYTES_PER_GB
}

/// Kind of resource consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Network traffic, measured in bytes.
    Traffic,
    /// Stored data, measured in bytes.
    Storage,
    /// Compute work, measured in base units.
    Compute,
}

impl ResourceType {
    /// Get the resource type name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Traffic => "traffic",
            Self::Storage => "storage",
            Self::Compute => "compute",
        }
    }
}

impl FromStr for ResourceType {
    type Err = crate::BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "traffic" => Ok(Self::Traffic),
            "storage" => Ok(Self::Storage),
            "compute" => Ok(Self::Compute),
            other => Err(crate::BillingError::Validation(format!(
                "unknown resource type: {other}"
            ))),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the usage was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    /// API request handling.
    Api,
    /// File upload or download.
    File,
    /// Background job execution.
    Job,
    /// AI model invocation.
    Ai,
}

impl UsageSource {
    /// Get the source name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::File => "file",
            Self::Job => "job",
            Self::Ai => "ai",
        }
    }
}

impl FromStr for UsageSource {
    type Err = crate::BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(Self::Api),
            "file" => Ok(Self::File),
            "job" => Ok(Self::Job),
            "ai" => Ok(Self::Ai),
            other => Err(crate::BillingError::Validation(format!(
                "unknown usage source: {other}"
            ))),
        }
    }
}

impl fmt::Display for UsageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of account that pays for usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEntityType {
    /// An individual user account.
    User,
    /// An organization.
    Organization,
}

impl BillingEntityType {
    /// Get the entity type name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Organization => "organization",
        }
    }
}

/// The account financially responsible for a usage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingEntity {
    /// User or organization id.
    pub id: BillingEntityId,
    /// Which of the two it is.
    pub entity_type: BillingEntityType,
}

/// A stored usage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Ledger id (time-ordered).
    pub id: EventId,

    /// Owning workspace.
    pub workspace_id: WorkspaceId,

    /// Project inside the workspace, if any.
    pub project_id: Option<ProjectId>,

    /// What was consumed.
    pub resource_type: ResourceType,

    /// Bytes for traffic/storage, base count for compute.
    pub units: f64,

    /// Compute base count before weighting.
    pub base_units: Option<f64>,

    /// Compute units after the job-type weight is applied.
    pub weighted_units: Option<f64>,

    /// Compute job type used to look up the weight.
    pub job_type: Option<String>,

    /// Caller-supplied key identifying one logical operation.
    pub idempotency_key: String,

    /// When the usage occurred; authoritative for billing.
    pub timestamp: DateTime<Utc>,

    /// When the event was written to the ledger.
    pub recorded_at: DateTime<Utc>,

    /// Producer category.
    pub source: UsageSource,

    /// Who pays, resolved from `timestamp` at ingestion.
    pub billing_entity: BillingEntity,

    /// Free-form producer metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl UsageEvent {
    /// Quantity this event contributes to billing.
    ///
    /// Compute events bill weighted units; everything else bills raw units.
    #[must_use]
    pub fn billable_units(&self) -> f64 {
        match self.resource_type {
            ResourceType::Compute => self.weighted_units.unwrap_or(self.units),
            ResourceType::Traffic | ResourceType::Storage => self.units,
        }
    }
}

/// A usage observation as submitted by a producer, before ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUsageEvent {
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Project inside the workspace, if any.
    pub project_id: Option<ProjectId>,
    /// What was consumed.
    pub resource_type: ResourceType,
    /// Raw quantity.
    pub units: f64,
    /// Compute base count (defaults to `units`).
    pub base_units: Option<f64>,
    /// Compute job type.
    pub job_type: Option<String>,
    /// Caller-supplied idempotency key.
    pub idempotency_key: Option<String>,
    /// When the usage occurred (defaults to ingestion time).
    pub timestamp: Option<DateTime<Utc>>,
    /// Producer category.
    pub source: UsageSource,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
}

impl NewUsageEvent {
    /// Check quantities and keys.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` for negative or non-finite units
    /// and for blank idempotency keys.
    pub fn validate(&self) -> crate::Result<()> {
        check_quantity("units", self.units)?;
        if let Some(base) = self.base_units {
            check_quantity("base_units", base)?;
        }
        if self
            .idempotency_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(crate::BillingError::Validation(
                "idempotency_key must not be blank".into(),
            ));
        }
        if let Some(ts) = self.timestamp {
            // Ledger keys store nanoseconds since the epoch as i64.
            if ts.timestamp_nanos_opt().is_none() {
                return Err(crate::BillingError::Validation(
                    "timestamp is out of range".into(),
                ));
            }
        }
        Ok(())
    }
}

fn check_quantity(field: &str, value: f64) -> crate::Result<()> {
    if !value.is_finite() {
        return Err(crate::BillingError::Validation(format!(
            "{field} must be a finite number"
        )));
    }
    if value < 0.0 {
        return Err(crate::BillingError::Validation(format!(
            "{field} must be >= 0, got {value}"
        )));
    }
    Ok(())
}

/// Stored bytes of one workspace (or project) on one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDailySnapshot {
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Project, if the snapshot is per project.
    pub project_id: Option<ProjectId>,
    /// Gigabytes held.
    pub storage_gb: f64,
    /// The UTC day observed.
    pub date: NaiveDate,
    /// Who pays for storage held on this day.
    pub billing_entity: BillingEntity,
    /// When the snapshot was written.
    pub recorded_at: DateTime<Utc>,
}
