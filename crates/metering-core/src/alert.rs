//! Usage alert definitions and threshold evaluation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AlertId, BillingError, PeriodTotals, ResourceType, WorkspaceId};

/// Default quiet period between two notifications of the same alert.
pub const DEFAULT_ALERT_COOLDOWN_SECS: i64 = 24 * 60 * 60;

/// Notification channel of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Email to `recipient`.
    Email,
    /// JSON POST to `webhook_url`.
    Webhook,
}

impl AlertType {
    /// Get the channel name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured usage threshold.
///
/// Thresholds use the aggregation's units: GB for traffic and storage,
/// weighted units for compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDefinition {
    /// Alert id.
    pub id: AlertId,
    /// Workspace watched.
    pub workspace_id: WorkspaceId,
    /// Resource watched.
    pub resource_type: ResourceType,
    /// Fires when usage reaches this value.
    pub threshold: f64,
    /// Channel.
    pub alert_type: AlertType,
    /// Disabled alerts never fire.
    pub is_enabled: bool,
    /// Target for webhook alerts.
    pub webhook_url: Option<String>,
    /// Target for email alerts.
    pub recipient: Option<String>,
    /// Last time the alert fired.
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

/// Request to create an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    /// Resource watched.
    pub resource_type: ResourceType,
    /// Fires when usage reaches this value.
    pub threshold: f64,
    /// Channel.
    pub alert_type: AlertType,
    /// Defaults to enabled.
    #[serde(default = "enabled_by_default")]
    pub is_enabled: bool,
    /// Required for webhook alerts.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Email recipient.
    #[serde(default)]
    pub recipient: Option<String>,
}

const fn enabled_by_default() -> bool {
    true
}

/// Partial update of an alert; absent fields are left as they are.
///
/// The two targets distinguish an absent field from an explicit `null`,
/// which clears the target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertUpdate {
    /// New threshold.
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Enable or disable.
    #[serde(default)]
    pub is_enabled: Option<bool>,
    /// New webhook target; `Some(None)` clears it.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub webhook_url: Option<Option<String>>,
    /// New email recipient; `Some(None)` clears it.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub recipient: Option<Option<String>>,
}

/// A field that is present deserializes to `Some`, even when it is `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl NewAlert {
    /// Validate and build the stored definition.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` for a negative or non-finite
    /// threshold, or a webhook alert without a URL.
    pub fn into_definition(
        self,
        workspace_id: WorkspaceId,
        now: DateTime<Utc>,
    ) -> crate::Result<AlertDefinition> {
        let alert = AlertDefinition {
            id: AlertId::generate(),
            workspace_id,
            resource_type: self.resource_type,
            threshold: self.threshold,
            alert_type: self.alert_type,
            is_enabled: self.is_enabled,
            webhook_url: self.webhook_url,
            recipient: self.recipient,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };
        alert.validate()?;
        Ok(alert)
    }
}

impl AlertDefinition {
    /// Check the definition is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` describing the first problem found.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(BillingError::Validation(
                "threshold must be a non-negative number".to_string(),
            ));
        }
        if self.alert_type == AlertType::Webhook
            && self.webhook_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(BillingError::Validation(
                "webhook alerts require webhook_url".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` if the result is invalid; the alert
    /// is left unchanged in that case.
    pub fn apply(&mut self, update: AlertUpdate, now: DateTime<Utc>) -> crate::Result<()> {
        let mut next = self.clone();
        if let Some(threshold) = update.threshold {
            next.threshold = threshold;
        }
        if let Some(enabled) = update.is_enabled {
            next.is_enabled = enabled;
        }
        if let Some(webhook_url) = update.webhook_url {
            next.webhook_url = webhook_url;
        }
        if let Some(recipient) = update.recipient {
            next.recipient = recipient;
        }
        next.validate()?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    fn in_cooldown(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_triggered_at
            .is_some_and(|last| now.signed_duration_since(last) < cooldown)
    }
}

/// Usage of the current period, in alert units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentUsage {
    /// Traffic in GB.
    #[serde(default)]
    pub traffic_gb: f64,
    /// Average storage in GB.
    #[serde(default)]
    pub storage_gb: f64,
    /// Weighted compute units.
    #[serde(default)]
    pub compute_units: f64,
}

impl CurrentUsage {
    /// Value for one resource.
    #[must_use]
    pub const fn value(&self, resource_type: ResourceType) -> f64 {
        match resource_type {
            ResourceType::Traffic => self.traffic_gb,
            ResourceType::Storage => self.storage_gb,
            ResourceType::Compute => self.compute_units,
        }
    }
}

impl From<PeriodTotals> for CurrentUsage {
    fn from(totals: PeriodTotals) -> Self {
        Self {
            traffic_gb: totals.traffic_total_gb,
            storage_gb: totals.storage_avg_gb,
            compute_units: totals.compute_total_units,
        }
    }
}

/// An alert that crossed its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredAlert {
    /// Alert id.
    pub alert_id: AlertId,
    /// Workspace.
    pub workspace_id: WorkspaceId,
    /// Resource.
    pub resource_type: ResourceType,
    /// Configured threshold.
    pub threshold: f64,
    /// Usage that triggered it.
    pub current_value: f64,
    /// Channel.
    pub alert_type: AlertType,
    /// Webhook target.
    pub webhook_url: Option<String>,
    /// Email target.
    pub recipient: Option<String>,
    /// When it fired.
    pub fired_at: DateTime<Utc>,
}

/// Evaluate alerts against current usage.
///
/// Every alert that fires gets `last_triggered_at = now`; the caller persists
/// that instant. Alerts that fired less than `cooldown` ago stay quiet.
pub fn evaluate(
    alerts: &mut [AlertDefinition],
    usage: &CurrentUsage,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Vec<FiredAlert> {
    let mut fired = Vec::new();

    for alert in alerts.iter_mut() {
        if !alert.is_enabled || alert.in_cooldown(now, cooldown) {
            continue;
        }
        let current_value = usage.value(alert.resource_type);
        if current_value < alert.threshold {
            continue;
        }

        alert.last_triggered_at = Some(now);
        fired.push(FiredAlert {
            alert_id: alert.id,
            workspace_id: alert.workspace_id,
            resource_type: alert.resource_type,
            threshold: alert.threshold,
            current_value,
            alert_type: alert.alert_type,
            webhook_url: alert.webhook_url.clone(),
            recipient: alert.recipient.clone(),
            fired_at: now,
        });
    }

    fired
}
