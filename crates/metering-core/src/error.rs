//! Error types for the metering engine.

use crate::ids::IdError;
use crate::period::PeriodError;

/// Result type for metering operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in metering operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The authorization oracle denied the operation.
    #[error("not permitted: {0}")]
    Unauthorized(String),

    /// A workspace, aggregation, invoice or alert does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Recompute attempted on a finalized aggregation.
    #[error("period {period} is locked for workspace {workspace_id} (invoice {invoice_id})")]
    PeriodLocked {
        /// Workspace of the aggregation.
        workspace_id: String,
        /// The locked period.
        period: String,
        /// Invoice that locked the period.
        invoice_id: String,
    },

    /// A second invoice was requested for an already invoiced aggregation.
    #[error("period {period} of workspace {workspace_id} is already invoiced as {invoice_id}")]
    DuplicateInvoice {
        /// Workspace of the aggregation.
        workspace_id: String,
        /// The invoiced period.
        period: String,
        /// The existing invoice.
        invoice_id: String,
    },

    /// Writes are blocked because billing is suspended.
    #[error("billing is suspended for workspace {workspace_id}")]
    BillingSuspended {
        /// The suspended workspace.
        workspace_id: String,
    },

    /// Illegal invoice status change.
    #[error("cannot {action} invoice {invoice_id} in status {from}")]
    StateTransition {
        /// The invoice.
        invoice_id: String,
        /// Status at the time of the attempt.
        from: String,
        /// Attempted action (`finalize`, `pay`).
        action: &'static str,
    },

    /// A concurrent writer kept winning and retries were exhausted.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Shorthand for a `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<IdError> for BillingError {
    fn from(err: IdError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<PeriodError> for BillingError {
    fn from(err: PeriodError) -> Self {
        Self::Validation(err.to_string())
    }
}
