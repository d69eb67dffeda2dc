//! Error types for metering storage.

use metering_core::BillingError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// Insert of a key that already exists.
    #[error("already exists")]
    AlreadyExists,

    /// Compare-and-set on a revision lost against another writer.
    #[error("revision conflict: expected {expected}, found {actual}")]
    RevisionConflict {
        /// Revision the writer read.
        expected: u64,
        /// Revision currently stored.
        actual: u64,
    },

    /// Compare-and-set on an invoice status lost against another writer.
    #[error("status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        /// Status the writer read.
        expected: String,
        /// Status currently stored.
        actual: String,
    },

    /// The aggregation already links an invoice.
    #[error("aggregation already invoiced as {invoice_id}")]
    DuplicateInvoice {
        /// The existing invoice.
        invoice_id: String,
    },
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(msg) => Self::Storage(msg),
            StoreError::Serialization(msg) => Self::Serialization(msg),
            StoreError::NotFound => Self::Internal("record vanished during update".to_string()),
            other @ (StoreError::AlreadyExists
            | StoreError::RevisionConflict { .. }
            | StoreError::StatusConflict { .. }
            | StoreError::DuplicateInvoice { .. }) => Self::Conflict(other.to_string()),
        }
    }
}
