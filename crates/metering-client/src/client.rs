//! Metering HTTP client implementation.

use reqwest::{Client, RequestBuilder};
use std::time::Duration;

use metering_core::{
    BillingEntityId, BillingPeriod, Invoice, InvoiceId, UsageAggregation, WorkspaceId,
};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, BatchUsageRequest, BatchUsageResponse, GenerateInvoiceRequest,
    InvoiceListResponse, UsageRequest, UsageResponse,
};

/// Metering API client.
///
/// Reports usage and drives the monthly billing run.
#[derive(Debug, Clone)]
pub struct MeteringClient {
    client: Client,
    base_url: String,
    api_key: String,
    caller_id: String,
}

impl MeteringClient {
    /// Create a new metering client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the metering service (e.g., `"http://metering:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new metering client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            caller_id: options.caller_id,
        })
    }

    /// Report a usage event.
    ///
    /// A repeated idempotency key is not an error: the response carries the
    /// original event with `duplicate: true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn report_usage(&self, request: UsageRequest) -> Result<UsageResponse, ClientError> {
        let url = format!("{}/v1/usage", self.base_url);
        let response = self.authed(self.client.post(&url)).json(&request).send().await?;
        self.handle_response(response).await
    }

    /// Report multiple usage events in a batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn report_usage_batch(
        &self,
        events: Vec<UsageRequest>,
    ) -> Result<BatchUsageResponse, ClientError> {
        let url = format!("{}/v1/usage/batch", self.base_url);
        let request = BatchUsageRequest { events };

        let response = self.authed(self.client.post(&url)).json(&request).send().await?;
        self.handle_response(response).await
    }

    /// Recompute the aggregation of a period.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::PeriodLocked` once the period is invoiced.
    pub async fn calculate_aggregation(
        &self,
        workspace_id: WorkspaceId,
        period: BillingPeriod,
        billing_entity_id: Option<BillingEntityId>,
    ) -> Result<UsageAggregation, ClientError> {
        let url = format!(
            "{}/v1/workspaces/{workspace_id}/aggregations/{period}",
            self.base_url
        );
        let mut request = self.authed(self.client.post(&url));
        if let Some(entity) = billing_entity_id {
            request = request.query(&[("billing_entity_id", entity.to_string())]);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Read a stored aggregation.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if it was never calculated.
    pub async fn get_aggregation(
        &self,
        workspace_id: WorkspaceId,
        period: BillingPeriod,
        billing_entity_id: Option<BillingEntityId>,
    ) -> Result<UsageAggregation, ClientError> {
        let url = format!(
            "{}/v1/workspaces/{workspace_id}/aggregations/{period}",
            self.base_url
        );
        let mut request = self.authed(self.client.get(&url));
        if let Some(entity) = billing_entity_id {
            request = request.query(&[("billing_entity_id", entity.to_string())]);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Generate the draft invoice of a period, locking its aggregation.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::DuplicateInvoice` if the period was already invoiced.
    pub async fn generate_invoice(
        &self,
        workspace_id: WorkspaceId,
        period: BillingPeriod,
        billing_entity_id: Option<BillingEntityId>,
    ) -> Result<Invoice, ClientError> {
        let url = format!("{}/v1/workspaces/{workspace_id}/invoices", self.base_url);
        let request = GenerateInvoiceRequest {
            period,
            billing_entity_id,
        };

        let response = self.authed(self.client.post(&url)).json(&request).send().await?;
        self.handle_response(response).await
    }

    /// List the invoices of a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_invoices(&self, workspace_id: WorkspaceId) -> Result<Vec<Invoice>, ClientError> {
        let url = format!("{}/v1/workspaces/{workspace_id}/invoices", self.base_url);
        let response = self.authed(self.client.get(&url)).send().await?;
        let list: InvoiceListResponse = self.handle_response(response).await?;
        Ok(list.invoices)
    }

    /// Get one invoice.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` for unknown invoices.
    pub async fn get_invoice(&self, invoice_id: &InvoiceId) -> Result<Invoice, ClientError> {
        let url = format!("{}/v1/invoices/{invoice_id}", self.base_url);
        let response = self.authed(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }

    /// Finalize a draft invoice.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidStateTransition` if it is not a draft.
    pub async fn finalize_invoice(&self, invoice_id: &InvoiceId) -> Result<Invoice, ClientError> {
        self.invoice_action(invoice_id, "finalize").await
    }

    /// Mark a finalized invoice as paid.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidStateTransition` if it is not finalized.
    pub async fn pay_invoice(&self, invoice_id: &InvoiceId) -> Result<Invoice, ClientError> {
        self.invoice_action(invoice_id, "pay").await
    }

    async fn invoice_action(
        &self,
        invoice_id: &InvoiceId,
        action: &str,
    ) -> Result<Invoice, ClientError> {
        let url = format!("{}/v1/invoices/{invoice_id}/{action}", self.base_url);
        let response = self.authed(self.client.post(&url)).send().await?;
        self.handle_response(response).await
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("x-caller-id", &self.caller_id)
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(ApiErrorResponse { error }) => {
                tracing::debug!(
                    status = status.as_u16(),
                    code = %error.code,
                    caller = %self.caller_id,
                    "Metering API returned an error"
                );

                // Map specific error codes to typed errors
                match error.code.as_str() {
                    "period_locked" => Err(ClientError::PeriodLocked {
                        invoice_id: error.detail("invoice_id"),
                    }),
                    "duplicate_invoice" => Err(ClientError::DuplicateInvoice {
                        invoice_id: error.detail("invoice_id"),
                    }),
                    "invalid_state_transition" => Err(ClientError::InvalidStateTransition {
                        invoice_id: error.detail("invoice_id"),
                        status: error.detail("status"),
                        action: error.detail("action"),
                    }),
                    "billing_suspended" => Err(ClientError::BillingSuspended {
                        workspace_id: error.detail("workspace_id"),
                    }),
                    "not_found" => Err(ClientError::NotFound(error.message)),
                    _ => Err(ClientError::Api {
                        code: error.code,
                        message: error.message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Caller identity sent as `x-caller-id` for authorization.
    pub caller_id: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            caller_id: "service".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a caller identity.
    #[must_use]
    pub fn with_caller_id(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            ..Self::default()
        }
    }
}
