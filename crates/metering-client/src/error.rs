//! Client error types.

/// Errors that can occur when using the metering client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The period already has an invoice and cannot be recomputed.
    #[error("period locked by invoice {invoice_id}")]
    PeriodLocked {
        /// The invoice holding the lock.
        invoice_id: String,
    },

    /// The period was already invoiced.
    #[error("duplicate invoice: {invoice_id}")]
    DuplicateInvoice {
        /// The existing invoice.
        invoice_id: String,
    },

    /// The invoice is not in a status that allows the action.
    #[error("cannot {action} invoice {invoice_id} in status {status}")]
    InvalidStateTransition {
        /// The invoice.
        invoice_id: String,
        /// Its current status.
        status: String,
        /// The refused action.
        action: String,
    },

    /// Billing is suspended for the workspace.
    #[error("billing suspended: {workspace_id}")]
    BillingSuspended {
        /// The workspace.
        workspace_id: String,
    },

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] metering_core::IdError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}
