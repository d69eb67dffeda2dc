//! Alert notification delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use metering_core::{AlertType, BillingError, FiredAlert, Result};

/// Timeout for webhook deliveries.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers fired alerts.
///
/// Delivery is best-effort: failures are logged by the implementation and
/// never undo the alert's `last_triggered_at` update.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one fired alert.
    async fn notify(&self, alert: &FiredAlert);
}

/// Writes fired alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &FiredAlert) {
        tracing::warn!(
            alert_id = %alert.alert_id,
            workspace_id = %alert.workspace_id,
            resource_type = %alert.resource_type,
            threshold = alert.threshold,
            current_value = alert.current_value,
            alert_type = %alert.alert_type,
            "Usage alert fired"
        );
    }
}

/// POSTs webhook alerts as JSON; logs email alerts.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    /// Create a notifier.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Internal` if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn post(&self, url: &str, alert: &FiredAlert) {
        match self.client.post(url).json(alert).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(alert_id = %alert.alert_id, url = %url, "Alert webhook delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    alert_id = %alert.alert_id,
                    url = %url,
                    status = %response.status(),
                    "Alert webhook rejected"
                );
            }
            Err(e) => {
                tracing::warn!(
                    alert_id = %alert.alert_id,
                    url = %url,
                    error = %e,
                    "Alert webhook delivery failed"
                );
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &FiredAlert) {
        match (alert.alert_type, alert.webhook_url.as_deref()) {
            (AlertType::Webhook, Some(url)) => self.post(url, alert).await,
            _ => LogNotifier.notify(alert).await,
        }
    }
}
