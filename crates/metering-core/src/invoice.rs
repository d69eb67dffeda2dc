//! Invoices and their lifecycle.
//!
//! An invoice is an immutable snapshot of one aggregation's totals and cost.
//! Only its status moves, and only forward: `draft → finalized → paid`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pricing::{self, BillingRates};
use crate::{
    AggregationId, BillingEntityId, BillingError, BillingPeriod, InvoiceId, UsageAggregation,
    WorkspaceId,
};

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Created, not yet issued.
    Draft,
    /// Issued to the customer.
    Finalized,
    /// Settled.
    Paid,
}

impl InvoiceStatus {
    /// Get the status name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Finalized => "finalized",
            Self::Paid => "paid",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable billing snapshot of one aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Human-readable id.
    pub invoice_id: InvoiceId,
    /// Workspace billed.
    pub workspace_id: WorkspaceId,
    /// Month billed.
    pub period: BillingPeriod,
    /// Billing entity filter of the source aggregation.
    pub billing_entity_id: Option<BillingEntityId>,
    /// Traffic in GB.
    pub traffic_gb: f64,
    /// Time-weighted average storage in GB.
    pub storage_avg_gb: f64,
    /// Weighted compute units.
    pub compute_units: f64,
    /// Traffic line.
    pub traffic_cost: Decimal,
    /// Storage line.
    pub storage_cost: Decimal,
    /// Compute line.
    pub compute_cost: Decimal,
    /// Sum of the lines.
    pub total_cost: Decimal,
    /// Rates the cost was computed with.
    pub rates: BillingRates,
    /// Source aggregation.
    pub aggregation_snapshot_id: AggregationId,
    /// Revision of the source aggregation the totals were read from.
    pub aggregation_revision: u64,
    /// Lifecycle status.
    pub status: InvoiceStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When it was finalized.
    pub finalized_at: Option<DateTime<Utc>>,
    /// When it was paid.
    pub paid_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// Build a draft invoice from an unlocked aggregation.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::DuplicateInvoice` if the aggregation already has
    /// an invoice.
    pub fn draft(
        aggregation: &UsageAggregation,
        rates: &BillingRates,
        now: DateTime<Utc>,
    ) -> crate::Result<Self> {
        if let Some(existing) = &aggregation.invoice_id {
            return Err(BillingError::DuplicateInvoice {
                workspace_id: aggregation.workspace_id.to_string(),
                period: aggregation.period.to_string(),
                invoice_id: existing.to_string(),
            });
        }

        let breakdown = pricing::cost(
            aggregation.traffic_total_gb,
            aggregation.storage_avg_gb,
            aggregation.compute_total_units,
            rates,
        );

        Ok(Self {
            invoice_id: InvoiceId::generate(&aggregation.period),
            workspace_id: aggregation.workspace_id,
            period: aggregation.period,
            billing_entity_id: aggregation.billing_entity_id,
            traffic_gb: aggregation.traffic_total_gb,
            storage_avg_gb: aggregation.storage_avg_gb,
            compute_units: aggregation.compute_total_units,
            traffic_cost: breakdown.traffic,
            storage_cost: breakdown.storage,
            compute_cost: breakdown.compute,
            total_cost: breakdown.total,
            rates: rates.clone(),
            aggregation_snapshot_id: aggregation.id,
            aggregation_revision: aggregation.revision,
            status: InvoiceStatus::Draft,
            created_at: now,
            finalized_at: None,
            paid_at: None,
        })
    }

    /// Move `draft → finalized`.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::StateTransition` from any other status; the
    /// invoice is left unchanged.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> crate::Result<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(self.transition_error("finalize"));
        }
        self.status = InvoiceStatus::Finalized;
        self.finalized_at = Some(now);
        Ok(())
    }

    /// Move `finalized → paid`.
    ///
    /// Paying a draft is rejected: an invoice must be issued before it can be
    /// settled.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::StateTransition` from any other status; the
    /// invoice is left unchanged.
    pub fn pay(&mut self, now: DateTime<Utc>) -> crate::Result<()> {
        if self.status != InvoiceStatus::Finalized {
            return Err(self.transition_error("pay"));
        }
        self.status = InvoiceStatus::Paid;
        self.paid_at = Some(now);
        Ok(())
    }

    /// Recompute the cost from the stored quantities and rates.
    ///
    /// Used by audits: the result must equal the stored lines.
    #[must_use]
    pub fn recompute_cost(&self) -> pricing::CostBreakdown {
        pricing::cost(
            self.traffic_gb,
            self.storage_avg_gb,
            self.compute_units,
            &self.rates,
        )
    }

    fn transition_error(&self, action: &'static str) -> BillingError {
        BillingError::StateTransition {
            invoice_id: self.invoice_id.to_string(),
            from: self.status.to_string(),
            action,
        }
    }
}
