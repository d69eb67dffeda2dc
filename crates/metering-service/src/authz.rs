//! Authorization oracle.
//!
//! Every engine operation asks an [`Authorizer`] whether the caller may act
//! on the workspace. Deployments without an oracle use [`StaticAuthorizer`],
//! which trusts anyone holding the service key.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use metering_core::{BillingError, Result, WorkspaceId};

/// Timeout for a single oracle call.
const AUTHZ_TIMEOUT: Duration = Duration::from_secs(5);

/// Operations that require authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Ingest usage events.
    RecordUsage,
    /// Record storage snapshots.
    RecordStorage,
    /// Read aggregations.
    ReadUsage,
    /// Compute aggregations.
    CalculateAggregation,
    /// Generate invoices.
    GenerateInvoice,
    /// Finalize invoices.
    FinalizeInvoice,
    /// Mark invoices paid.
    PayInvoice,
    /// Read invoices.
    ReadInvoices,
    /// Create, update, delete and evaluate alerts.
    ManageAlerts,
    /// Export raw events.
    ExportEvents,
}

impl Action {
    /// Get the action name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RecordUsage => "record_usage",
            Self::RecordStorage => "record_storage",
            Self::ReadUsage => "read_usage",
            Self::CalculateAggregation => "calculate_aggregation",
            Self::GenerateInvoice => "generate_invoice",
            Self::FinalizeInvoice => "finalize_invoice",
            Self::PayInvoice => "pay_invoice",
            Self::ReadInvoices => "read_invoices",
            Self::ManageAlerts => "manage_alerts",
            Self::ExportEvents => "export_events",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a caller may perform an action on a workspace.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Ask for a decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the oracle cannot be reached; callers treat that
    /// as a failure, never as permission.
    async fn is_allowed(
        &self,
        caller: &str,
        workspace_id: &WorkspaceId,
        action: Action,
    ) -> Result<bool>;
}

/// Allows every caller except an explicit deny list.
#[derive(Debug, Default, Clone)]
pub struct StaticAuthorizer {
    denied: HashSet<String>,
}

impl StaticAuthorizer {
    /// Allow everyone.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Deny every action to `caller`.
    #[must_use]
    pub fn deny_caller(mut self, caller: impl Into<String>) -> Self {
        self.denied.insert(caller.into());
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn is_allowed(
        &self,
        caller: &str,
        _workspace_id: &WorkspaceId,
        _action: Action,
    ) -> Result<bool> {
        Ok(!self.denied.contains(caller))
    }
}

#[derive(Debug, Serialize)]
struct AuthzRequest<'a> {
    caller: &'a str,
    workspace_id: &'a WorkspaceId,
    action: Action,
}

#[derive(Debug, Deserialize)]
struct AuthzResponse {
    allowed: bool,
}

/// Asks a remote HTTP oracle.
///
/// Sends `POST {url}` with `{caller, workspace_id, action}` and expects
/// `{"allowed": bool}`.
#[derive(Debug, Clone)]
pub struct HttpAuthorizer {
    client: Client,
    url: String,
}

impl HttpAuthorizer {
    /// Create an oracle client.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Internal` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(AUTHZ_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Authorizer for HttpAuthorizer {
    async fn is_allowed(
        &self,
        caller: &str,
        workspace_id: &WorkspaceId,
        action: Action,
    ) -> Result<bool> {
        let request = AuthzRequest {
            caller,
            workspace_id,
            action,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %self.url, "Authorization oracle unreachable");
                BillingError::Internal(format!("authorization oracle unreachable: {e}"))
            })?;

        if !response.status().is_success() {
            tracing::error!(
                status = %response.status(),
                url = %self.url,
                "Authorization oracle returned non-success status"
            );
            return Err(BillingError::Internal(format!(
                "authorization oracle returned {}",
                response.status()
            )));
        }

        let decision: AuthzResponse = response.json().await.map_err(|e| {
            BillingError::Internal(format!("invalid authorization oracle response: {e}"))
        })?;

        tracing::debug!(
            caller = %caller,
            workspace_id = %workspace_id,
            action = %action,
            allowed = decision.allowed,
            "Authorization decision"
        );

        Ok(decision.allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn static_authorizer_denies_listed_callers() {
        let authz = StaticAuthorizer::allow_all().deny_caller("intruder");
        let ws = WorkspaceId::generate();
        assert!(authz.is_allowed("api", &ws, Action::RecordUsage).await.unwrap());
        assert!(!authz.is_allowed("intruder", &ws, Action::RecordUsage).await.unwrap());
    }

    #[tokio::test]
    async fn http_authorizer_posts_decision_request() {
        let server = MockServer::start().await;
        let ws = WorkspaceId::generate();

        Mock::given(method("POST"))
            .and(path("/authorize"))
            .and(body_json(serde_json::json!({
                "caller": "reporter",
                "workspace_id": ws.to_string(),
                "action": "generate_invoice",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "allowed": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let authz = HttpAuthorizer::new(format!("{}/authorize", server.uri())).unwrap();
        let allowed = authz
            .is_allowed("reporter", &ws, Action::GenerateInvoice)
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn http_authorizer_fails_closed_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let authz = HttpAuthorizer::new(server.uri()).unwrap();
        let err = authz
            .is_allowed("api", &WorkspaceId::generate(), Action::ReadUsage)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Internal(_)));
    }
}
