//! Alert definitions and evaluation.

use chrono::Utc;

use metering_core::alert;
use metering_core::{
    AggregationKey, AlertDefinition, AlertId, AlertUpdate, BillingError, BillingPeriod,
    CurrentUsage, FiredAlert, NewAlert, Result, WorkspaceId,
};
use metering_store::StoreError;

use super::MeteringEngine;
use crate::authz::Action;
use crate::context::RequestContext;

impl MeteringEngine {
    /// Create an alert.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown workspaces, `Validation` for bad thresholds or
    /// webhook alerts without a URL.
    pub async fn create_alert(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        new: NewAlert,
    ) -> Result<AlertDefinition> {
        self.authorize(ctx, &workspace_id, Action::ManageAlerts)
            .await?;
        self.workspace(ctx, &workspace_id)?;

        let alert = new.into_definition(workspace_id, Utc::now())?;
        self.store.put_alert(&alert)?;

        tracing::info!(
            alert_id = %alert.id,
            workspace_id = %workspace_id,
            resource_type = %alert.resource_type,
            threshold = alert.threshold,
            "Alert created"
        );
        Ok(alert)
    }

    /// Alerts of a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if authorization or the store read fails.
    pub async fn list_alerts(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<AlertDefinition>> {
        self.authorize(ctx, &workspace_id, Action::ManageAlerts)
            .await?;
        Ok(self.store.list_alerts(&workspace_id)?)
    }

    /// One alert.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the alert doesn't exist in the workspace.
    pub async fn get_alert(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        alert_id: AlertId,
    ) -> Result<AlertDefinition> {
        self.authorize(ctx, &workspace_id, Action::ManageAlerts)
            .await?;
        self.load_alert(&workspace_id, &alert_id)
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `Validation` if the updated alert would be invalid.
    pub async fn update_alert(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        alert_id: AlertId,
        update: AlertUpdate,
    ) -> Result<AlertDefinition> {
        self.authorize(ctx, &workspace_id, Action::ManageAlerts)
            .await?;
        let mut alert = self.load_alert(&workspace_id, &alert_id)?;
        alert.apply(update, Utc::now())?;
        self.store.put_alert(&alert)?;
        tracing::info!(alert_id = %alert_id, workspace_id = %workspace_id, "Alert updated");
        Ok(alert)
    }

    /// Delete an alert.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the alert doesn't exist in the workspace.
    pub async fn delete_alert(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        alert_id: AlertId,
    ) -> Result<()> {
        self.authorize(ctx, &workspace_id, Action::ManageAlerts)
            .await?;
        match self.store.delete_alert(&workspace_id, &alert_id) {
            Ok(()) => {
                tracing::info!(alert_id = %alert_id, workspace_id = %workspace_id, "Alert deleted");
                Ok(())
            }
            Err(StoreError::NotFound) => Err(BillingError::not_found("alert", alert_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Compare usage against every alert of the workspace.
    ///
    /// Without `usage`, the stored aggregation of the current month is used
    /// as is (it is not recomputed), or zeros if there is none. Fired alerts
    /// get `last_triggered_at` persisted before notifications go out; nothing
    /// else of the definition is written.
    ///
    /// # Errors
    ///
    /// Returns an error if authorization or a store operation fails.
    pub async fn evaluate_alerts(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        usage: Option<CurrentUsage>,
    ) -> Result<Vec<FiredAlert>> {
        self.authorize(ctx, &workspace_id, Action::ManageAlerts)
            .await?;

        let now = Utc::now();
        let usage = match usage {
            Some(usage) => usage,
            None => {
                let key = AggregationKey::new(workspace_id, BillingPeriod::containing(now)?, None);
                self.store
                    .get_aggregation(&key)?
                    .map(|aggregation| CurrentUsage::from(aggregation.totals()))
                    .unwrap_or_default()
            }
        };

        let mut alerts = self.store.list_alerts(&workspace_id)?;
        let mut fired = alert::evaluate(&mut alerts, &usage, now, self.alert_cooldown);

        // Only the trigger instant is written back; edits made since the
        // list above are kept.
        let mut deleted = Vec::new();
        for alert in &fired {
            match self
                .store
                .record_alert_triggered(&workspace_id, &alert.alert_id, now)
            {
                Ok(()) => {}
                Err(StoreError::NotFound) => {
                    tracing::debug!(alert_id = %alert.alert_id, "Alert deleted during evaluation");
                    deleted.push(alert.alert_id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        fired.retain(|alert| !deleted.contains(&alert.alert_id));

        for alert in &fired {
            self.notifier.notify(alert).await;
        }

        tracing::debug!(
            workspace_id = %workspace_id,
            evaluated = alerts.len(),
            fired = fired.len(),
            "Alerts evaluated"
        );
        Ok(fired)
    }

    fn load_alert(&self, workspace_id: &WorkspaceId, alert_id: &AlertId) -> Result<AlertDefinition> {
        self.store
            .get_alert(workspace_id, alert_id)?
            .ok_or_else(|| BillingError::not_found("alert", alert_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{ctx, fixture};
    use metering_core::{AlertType, NewUsageEvent, ResourceType, UsageSource};
    use metering_store::AlertRepository;

    fn traffic_alert(threshold: f64) -> NewAlert {
        NewAlert {
            resource_type: ResourceType::Traffic,
            threshold,
            alert_type: AlertType::Email,
            is_enabled: true,
            webhook_url: None,
            recipient: Some("ops@example.com".into()),
        }
    }

    fn usage(traffic_gb: f64) -> Option<CurrentUsage> {
        Some(CurrentUsage {
            traffic_gb,
            ..CurrentUsage::default()
        })
    }

    #[tokio::test]
    async fn fires_once_per_cooldown() {
        let f = fixture();
        let ws = f.workspace.id;
        let alert = f
            .engine
            .create_alert(&ctx(), ws, traffic_alert(5.0))
            .await
            .unwrap();

        let quiet = f.engine.evaluate_alerts(&ctx(), ws, usage(4.9)).await.unwrap();
        assert!(quiet.is_empty());

        let fired = f.engine.evaluate_alerts(&ctx(), ws, usage(5.0)).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].alert_id, alert.id);

        let stored = f.engine.get_alert(&ctx(), ws, alert.id).await.unwrap();
        assert!(stored.last_triggered_at.is_some());

        let again = f.engine.evaluate_alerts(&ctx(), ws, usage(50.0)).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn disabled_alerts_stay_quiet() {
        let f = fixture();
        let ws = f.workspace.id;
        let alert = f
            .engine
            .create_alert(&ctx(), ws, traffic_alert(1.0))
            .await
            .unwrap();
        f.engine
            .update_alert(
                &ctx(),
                ws,
                alert.id,
                AlertUpdate {
                    is_enabled: Some(false),
                    ..AlertUpdate::default()
                },
            )
            .await
            .unwrap();

        let fired = f.engine.evaluate_alerts(&ctx(), ws, usage(10.0)).await.unwrap();
        assert!(fired.is_empty());
    }

    #[tokio::test]
    async fn evaluation_defaults_to_stored_current_month() {
        let f = fixture();
        let ws = f.workspace.id;
        f.engine
            .create_alert(&ctx(), ws, traffic_alert(1.0))
            .await
            .unwrap();

        // Nothing aggregated yet: zeros.
        assert!(f.engine.evaluate_alerts(&ctx(), ws, None).await.unwrap().is_empty());

        f.engine
            .record_usage(
                &ctx(),
                NewUsageEvent {
                    workspace_id: ws,
                    project_id: None,
                    resource_type: ResourceType::Traffic,
                    units: 2.0 * 1_073_741_824.0,
                    base_units: None,
                    job_type: None,
                    idempotency_key: Some("now".into()),
                    timestamp: None,
                    source: UsageSource::Api,
                    metadata: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();
        let period = BillingPeriod::containing(Utc::now()).unwrap();
        f.engine
            .calculate_aggregation(&ctx(), ws, period, None)
            .await
            .unwrap();

        let fired = f.engine.evaluate_alerts(&ctx(), ws, None).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert!((fired[0].current_value - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn webhook_alert_requires_url() {
        let f = fixture();
        let mut new = traffic_alert(1.0);
        new.alert_type = AlertType::Webhook;
        let err = f
            .engine
            .create_alert(&ctx(), f.workspace.id, new)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let f = fixture();
        let ws = f.workspace.id;
        let alert = f
            .engine
            .create_alert(&ctx(), ws, traffic_alert(1.0))
            .await
            .unwrap();
        f.engine.delete_alert(&ctx(), ws, alert.id).await.unwrap();

        let err = f.engine.get_alert(&ctx(), ws, alert.id).await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound { entity: "alert", .. }));
        let err = f.engine.delete_alert(&ctx(), ws, alert.id).await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn firing_keeps_an_edit_made_after_the_read() {
        let f = fixture();
        let ws = f.workspace.id;
        let alert = f
            .engine
            .create_alert(&ctx(), ws, traffic_alert(5.0))
            .await
            .unwrap();

        // Evaluation read the alert at threshold 5 and fires; an edit
        // lands before the trigger is written.
        let mut listed = f.store.list_alerts(&ws).unwrap();
        let current = usage(10.0).unwrap();
        let fired = alert::evaluate(&mut listed, &current, Utc::now(), f.engine.alert_cooldown);
        assert_eq!(fired.len(), 1);
        let edited = f
            .engine
            .update_alert(
                &ctx(),
                ws,
                alert.id,
                AlertUpdate {
                    threshold: Some(500.0),
                    recipient: Some(Some("billing@example.com".into())),
                    ..AlertUpdate::default()
                },
            )
            .await
            .unwrap();
        f.store
            .record_alert_triggered(&ws, &alert.id, fired[0].fired_at)
            .unwrap();

        let stored = f.engine.get_alert(&ctx(), ws, alert.id).await.unwrap();
        assert!((stored.threshold - 500.0).abs() < f64::EPSILON);
        assert_eq!(stored.recipient.as_deref(), Some("billing@example.com"));
        assert_eq!(stored.updated_at, edited.updated_at);
        assert_eq!(stored.last_triggered_at, Some(fired[0].fired_at));
    }

    #[tokio::test]
    async fn evaluation_writes_only_the_trigger_time() {
        let f = fixture();
        let ws = f.workspace.id;
        let alert = f
            .engine
            .create_alert(&ctx(), ws, traffic_alert(1.0))
            .await
            .unwrap();

        let fired = f.engine.evaluate_alerts(&ctx(), ws, usage(2.0)).await.unwrap();
        assert_eq!(fired.len(), 1);

        let stored = f.engine.get_alert(&ctx(), ws, alert.id).await.unwrap();
        assert_eq!(stored.last_triggered_at, Some(fired[0].fired_at));
        assert_eq!(stored.updated_at, alert.updated_at);
        assert_eq!(
            AlertDefinition {
                last_triggered_at: None,
                ..stored
            },
            alert
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_edits_survive_evaluation() {
        let f = fixture();
        let ws = f.workspace.id;
        let engine = std::sync::Arc::new(f.engine);
        let alert = engine
            .create_alert(&ctx(), ws, traffic_alert(1.0))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for round in 0..16 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                if round % 2 == 0 {
                    engine
                        .evaluate_alerts(&ctx(), ws, usage(100.0))
                        .await
                        .map(|_| ())
                } else {
                    engine
                        .update_alert(
                            &ctx(),
                            ws,
                            alert.id,
                            AlertUpdate {
                                threshold: Some(50.0),
                                ..AlertUpdate::default()
                            },
                        )
                        .await
                        .map(|_| ())
                }
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = engine.get_alert(&ctx(), ws, alert.id).await.unwrap();
        assert!((stored.threshold - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn null_webhook_url_clears_it() {
        let f = fixture();
        let ws = f.workspace.id;
        let mut new = traffic_alert(1.0);
        new.webhook_url = Some("https://hooks.example.com/usage".into());
        let alert = f.engine.create_alert(&ctx(), ws, new).await.unwrap();

        let update: AlertUpdate = serde_json::from_str(r#"{"webhook_url": null}"#).unwrap();
        let cleared = f
            .engine
            .update_alert(&ctx(), ws, alert.id, update)
            .await
            .unwrap();
        assert!(cleared.webhook_url.is_none());
        assert_eq!(cleared.recipient.as_deref(), Some("ops@example.com"));
        assert!(f
            .engine
            .get_alert(&ctx(), ws, alert.id)
            .await
            .unwrap()
            .webhook_url
            .is_none());
    }
}
