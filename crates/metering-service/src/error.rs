//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use metering_core::BillingError;
use metering_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - the authorization oracle denied the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The aggregation for the period is locked by an invoice.
    #[error("period {period} is locked by invoice {invoice_id}")]
    PeriodLocked {
        /// Workspace.
        workspace_id: String,
        /// Period.
        period: String,
        /// Locking invoice.
        invoice_id: String,
    },

    /// The aggregation already has an invoice.
    #[error("period {period} already invoiced as {invoice_id}")]
    DuplicateInvoice {
        /// Workspace.
        workspace_id: String,
        /// Period.
        period: String,
        /// Existing invoice.
        invoice_id: String,
    },

    /// Illegal invoice status change.
    #[error("cannot {action} invoice {invoice_id} in status {from}")]
    InvalidStateTransition {
        /// Invoice.
        invoice_id: String,
        /// Current status.
        from: String,
        /// Attempted action.
        action: String,
    },

    /// Concurrent modification.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Writes are blocked for the workspace.
    #[error("billing suspended for workspace {0}")]
    BillingSuspended(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
                None,
            ),
            Self::PeriodLocked {
                workspace_id,
                period,
                invoice_id,
            } => (
                StatusCode::CONFLICT,
                "period_locked",
                self.to_string(),
                Some(serde_json::json!({
                    "workspace_id": workspace_id,
                    "period": period,
                    "invoice_id": invoice_id,
                })),
            ),
            Self::DuplicateInvoice {
                workspace_id,
                period,
                invoice_id,
            } => (
                StatusCode::CONFLICT,
                "duplicate_invoice",
                self.to_string(),
                Some(serde_json::json!({
                    "workspace_id": workspace_id,
                    "period": period,
                    "invoice_id": invoice_id,
                })),
            ),
            Self::InvalidStateTransition {
                invoice_id,
                from,
                action,
            } => (
                StatusCode::CONFLICT,
                "invalid_state_transition",
                self.to_string(),
                Some(serde_json::json!({
                    "invoice_id": invoice_id,
                    "status": from,
                    "action": action,
                })),
            ),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::BillingSuspended(workspace_id) => (
                StatusCode::PAYMENT_REQUIRED,
                "billing_suspended",
                self.to_string(),
                Some(serde_json::json!({ "workspace_id": workspace_id })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => Self::BadRequest(msg),
            BillingError::Unauthorized(msg) => Self::Forbidden(msg),
            err @ BillingError::NotFound { .. } => Self::NotFound(err.to_string()),
            BillingError::PeriodLocked {
                workspace_id,
                period,
                invoice_id,
            } => Self::PeriodLocked {
                workspace_id,
                period,
                invoice_id,
            },
            BillingError::DuplicateInvoice {
                workspace_id,
                period,
                invoice_id,
            } => Self::DuplicateInvoice {
                workspace_id,
                period,
                invoice_id,
            },
            BillingError::BillingSuspended { workspace_id } => Self::BillingSuspended(workspace_id),
            BillingError::StateTransition {
                invoice_id,
                from,
                action,
            } => Self::InvalidStateTransition {
                invoice_id,
                from,
                action: action.to_string(),
            },
            BillingError::Conflict(msg) => Self::Conflict(msg),
            BillingError::Storage(msg)
            | BillingError::Serialization(msg)
            | BillingError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        BillingError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_errors_map_to_status_codes() {
        let cases = [
            (BillingError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (BillingError::Unauthorized("x".into()), StatusCode::FORBIDDEN),
            (BillingError::not_found("invoice", "INV-1"), StatusCode::NOT_FOUND),
            (
                BillingError::BillingSuspended {
                    workspace_id: "ws".into(),
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                BillingError::StateTransition {
                    invoice_id: "INV".into(),
                    from: "paid".into(),
                    action: "finalize",
                },
                StatusCode::CONFLICT,
            ),
            (BillingError::Conflict("x".into()), StatusCode::CONFLICT),
            (BillingError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn store_conflicts_are_conflicts() {
        let err = ApiError::from(StoreError::RevisionConflict {
            expected: 1,
            actual: 2,
        });
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
