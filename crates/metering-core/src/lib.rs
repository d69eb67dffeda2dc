//! Core types and pure logic for the usage metering engine.
//!
//! This crate holds everything that does not touch storage or the network:
//!
//! - **Identifiers**: `WorkspaceId`, `EventId`, `InvoiceId`, ...
//! - **Periods**: `BillingPeriod` (a UTC calendar month)
//! - **Usage**: `UsageEvent`, `NewUsageEvent`, `StorageDailySnapshot`
//! - **Attribution**: `entity::resolve` decides who pays for an event
//! - **Aggregation**: `compute_totals`, `UsageAggregation` and its lock
//! - **Invoices**: `Invoice` and its `draft → finalized → paid` lifecycle
//! - **Pricing**: `BillingRates`, `ComputeWeights`, `pricing::cost`
//! - **Alerts**: `AlertDefinition` and threshold evaluation
//! - **Export**: CSV/JSON encoding of ledger events
//!
//! # Units
//!
//! Traffic and storage events carry bytes; aggregations report GB
//! (1 GB = 1024³ bytes). Compute events carry a base count that is multiplied
//! by a per-job-type weight. Money is `rust_decimal::Decimal`, six places.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod aggregation;
pub mod alert;
pub mod entity;
pub mod error;
pub mod export;
pub mod ids;
pub mod invoice;
pub mod period;
pub mod pricing;
pub mod usage;

pub use aggregation::{compute_totals, AggregationKey, EntityScope, PeriodTotals, UsageAggregation};
pub use alert::{
    AlertDefinition, AlertType, AlertUpdate, CurrentUsage, FiredAlert, NewAlert,
    DEFAULT_ALERT_COOLDOWN_SECS,
};
pub use entity::{Organization, Workspace};
pub use error::{BillingError, Result};
pub use export::{ExportFilter, ExportFormat};
pub use ids::{
    AggregationId, AlertId, BillingEntityId, EventId, IdError, InvoiceId, OrganizationId,
    ProjectId, UserId, WorkspaceId,
};
pub use invoice::{Invoice, InvoiceStatus};
pub use period::{BillingPeriod, PeriodError};
pub use pricing::{BillingRates, ComputeWeights, CostBreakdown, PricingConfig};
pub use usage::{
    BillingEntity, BillingEntityType, NewUsageEvent, ResourceType, StorageDailySnapshot,
    UsageEvent, UsageSource,
};
