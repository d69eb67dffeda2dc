//! Event ingestion gate.

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use metering_core::{EventId, NewUsageEvent, ResourceType, Result, UsageEvent};
use metering_store::AppendOutcome;

use super::MeteringEngine;
use crate::authz::Action;
use crate::context::RequestContext;

/// Result of one ingestion call.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    /// The stored event (the earlier one for duplicates).
    pub event: UsageEvent,
    /// `false` when the idempotency key was already taken.
    pub created: bool,
}

impl From<AppendOutcome> for IngestOutcome {
    fn from(outcome: AppendOutcome) -> Self {
        let created = outcome.is_created();
        Self {
            event: outcome.into_event(),
            created,
        }
    }
}

impl MeteringEngine {
    /// Record one usage event.
    ///
    /// Checks run in order: authorization, workspace existence, suspension,
    /// input validation. A repeated idempotency key returns the stored event
    /// without writing.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `NotFound`, `BillingSuspended`, `Validation`, or a
    /// storage error.
    pub async fn record_usage(
        &self,
        ctx: &RequestContext,
        new: NewUsageEvent,
    ) -> Result<IngestOutcome> {
        self.authorize(ctx, &new.workspace_id, Action::RecordUsage)
            .await?;
        let (workspace, organization) = self.active_workspace(ctx, &new.workspace_id)?;
        new.validate()?;

        let now = Utc::now();
        let idempotency_key = idempotency_key_for(&new);
        let timestamp = new.timestamp.unwrap_or(now);
        let billing_entity = Self::billing_entity(&workspace, organization.as_ref(), timestamp);

        let (base_units, weighted_units) = match new.resource_type {
            ResourceType::Compute => {
                let base = new.base_units.unwrap_or(new.units);
                let weighted = self
                    .pricing
                    .compute_weights
                    .weighted_units(base, new.job_type.as_deref());
                (Some(base), Some(weighted))
            }
            ResourceType::Traffic | ResourceType::Storage => (new.base_units, None),
        };

        let event = UsageEvent {
            id: EventId::generate(),
            workspace_id: new.workspace_id,
            project_id: new.project_id,
            resource_type: new.resource_type,
            units: new.units,
            base_units,
            weighted_units,
            job_type: new.job_type,
            idempotency_key,
            timestamp,
            recorded_at: now,
            source: new.source,
            billing_entity,
            metadata: new.metadata,
        };

        let outcome = IngestOutcome::from(self.store.append_event(&event)?);

        if outcome.created {
            tracing::info!(
                caller = %ctx.caller(),
                workspace_id = %event.workspace_id,
                event_id = %event.id,
                resource_type = %event.resource_type,
                units = event.units,
                billing_entity_id = %event.billing_entity.id,
                billing_entity_type = event.billing_entity.entity_type.as_str(),
                "Usage recorded"
            );
        } else {
            tracing::debug!(
                workspace_id = %event.workspace_id,
                idempotency_key = %event.idempotency_key,
                existing_event_id = %outcome.event.id,
                "Duplicate usage event ignored"
            );
        }

        Ok(outcome)
    }

    /// Record several events. Each one succeeds or fails on its own.
    pub async fn record_usage_batch(
        &self,
        ctx: &RequestContext,
        events: Vec<NewUsageEvent>,
    ) -> Vec<Result<IngestOutcome>> {
        let mut results = Vec::with_capacity(events.len());
        for new in events {
            results.push(self.record_usage(ctx, new).await);
        }
        results
    }
}

/// The caller's key, else a digest of the event content when the producer
/// pinned a timestamp (identical retries collapse), else a fresh key.
fn idempotency_key_for(new: &NewUsageEvent) -> String {
    if let Some(key) = &new.idempotency_key {
        return key.clone();
    }
    match new.timestamp {
        Some(_) => content_digest(new),
        None => EventId::generate().to_string(),
    }
}

fn content_digest(new: &NewUsageEvent) -> String {
    let canonical = serde_json::json!({
        "workspace_id": new.workspace_id,
        "project_id": new.project_id,
        "resource_type": new.resource_type,
        "units": new.units,
        "base_units": new.base_units,
        "job_type": new.job_type,
        "timestamp": new
            .timestamp
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        "source": new.source,
        "metadata": new.metadata,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::StaticAuthorizer;
    use crate::engine::testing::{ctx, fixture, fixture_with};
    use chrono::{DateTime, Duration, TimeZone};
    use metering_core::{
        BillingEntityId, BillingEntityType, BillingError, UsageSource, WorkspaceId,
    };
    use metering_store::EventLedger;

    fn traffic(workspace_id: WorkspaceId, key: Option<&str>) -> NewUsageEvent {
        NewUsageEvent {
            workspace_id,
            project_id: None,
            resource_type: ResourceType::Traffic,
            units: 1024.0,
            base_units: None,
            job_type: None,
            idempotency_key: key.map(str::to_string),
            timestamp: None,
            source: UsageSource::Api,
            metadata: serde_json::Value::Null,
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn same_key_is_stored_once() {
        let f = fixture();
        let ctx = ctx();
        let first = f
            .engine
            .record_usage(&ctx, traffic(f.workspace.id, Some("op-1")))
            .await
            .unwrap();
        let mut retry = traffic(f.workspace.id, Some("op-1"));
        retry.units = 999_999.0;
        let second = f.engine.record_usage(&ctx, retry).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.event, second.event);
        let events = f
            .store
            .list_events(&f.workspace.id, at(2000, 1, 1), Utc::now() + Duration::days(1))
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn keyless_events_with_timestamp_collapse_by_content() {
        let f = fixture();
        let mut event = traffic(f.workspace.id, None);
        event.timestamp = Some(at(2024, 3, 5));

        let first = f.engine.record_usage(&ctx(), event.clone()).await.unwrap();
        let second = f.engine.record_usage(&ctx(), event.clone()).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert!(first.event.idempotency_key.starts_with("sha256:"));

        event.units += 1.0;
        let third = f.engine.record_usage(&ctx(), event).await.unwrap();
        assert!(third.created);
    }

    #[tokio::test]
    async fn keyless_events_without_timestamp_are_distinct() {
        let f = fixture();
        let first = f
            .engine
            .record_usage(&ctx(), traffic(f.workspace.id, None))
            .await
            .unwrap();
        let second = f
            .engine
            .record_usage(&ctx(), traffic(f.workspace.id, None))
            .await
            .unwrap();
        assert!(first.created && second.created);
        assert_ne!(first.event.idempotency_key, second.event.idempotency_key);
    }

    #[tokio::test]
    async fn compute_units_are_weighted_by_job_type() {
        let f = fixture();
        let mut event = traffic(f.workspace.id, Some("job-1"));
        event.resource_type = ResourceType::Compute;
        event.units = 3.0;
        event.job_type = Some("gpu".into());

        let stored = f.engine.record_usage(&ctx(), event).await.unwrap().event;
        assert_eq!(stored.base_units, Some(3.0));
        assert_eq!(stored.weighted_units, Some(30.0));

        let mut unknown = traffic(f.workspace.id, Some("job-2"));
        unknown.resource_type = ResourceType::Compute;
        unknown.units = 2.0;
        unknown.base_units = Some(4.0);
        unknown.job_type = Some("quantum".into());
        let stored = f.engine.record_usage(&ctx(), unknown).await.unwrap().event;
        assert_eq!(stored.weighted_units, Some(4.0));
    }

    #[tokio::test]
    async fn entity_is_resolved_from_event_timestamp() {
        let mut f = fixture();
        let start = at(2024, 3, 10);
        let org = f.join_organization(Some(start));

        let mut before = traffic(f.workspace.id, Some("before"));
        before.timestamp = Some(start - Duration::nanoseconds(1));
        let mut boundary = traffic(f.workspace.id, Some("boundary"));
        boundary.timestamp = Some(start);

        let before = f.engine.record_usage(&ctx(), before).await.unwrap().event;
        let boundary = f.engine.record_usage(&ctx(), boundary).await.unwrap().event;

        assert_eq!(before.billing_entity.entity_type, BillingEntityType::User);
        assert_eq!(
            before.billing_entity.id,
            BillingEntityId::from(f.workspace.owner_user_id)
        );
        assert_eq!(
            boundary.billing_entity.entity_type,
            BillingEntityType::Organization
        );
        assert_eq!(boundary.billing_entity.id, BillingEntityId::from(org.id));
    }

    #[tokio::test]
    async fn missing_organization_bills_owner() {
        let mut f = fixture();
        f.workspace.organization_id = Some(metering_core::OrganizationId::generate());
        f.engine.put_workspace(&f.workspace).unwrap();

        let stored = f
            .engine
            .record_usage(&ctx(), traffic(f.workspace.id, Some("op")))
            .await
            .unwrap()
            .event;
        assert_eq!(stored.billing_entity.entity_type, BillingEntityType::User);
    }

    #[tokio::test]
    async fn suspended_workspace_rejects_usage() {
        let mut f = fixture();
        f.workspace.billing_suspended = true;
        f.engine.put_workspace(&f.workspace).unwrap();

        let err = f
            .engine
            .record_usage(&ctx(), traffic(f.workspace.id, Some("op")))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::BillingSuspended { .. }));
    }

    #[tokio::test]
    async fn suspended_organization_rejects_usage() {
        let mut f = fixture();
        let mut org = f.join_organization(None);
        org.billing_suspended = true;
        f.engine.put_organization(&org).unwrap();

        let err = f
            .engine
            .record_usage(&ctx(), traffic(f.workspace.id, Some("op")))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::BillingSuspended { .. }));
    }

    #[tokio::test]
    async fn denied_caller_is_rejected_before_anything_else() {
        let f = fixture_with(StaticAuthorizer::allow_all().deny_caller("test"));
        // Unknown workspace: authorization still answers first.
        let err = f
            .engine
            .record_usage(&ctx(), traffic(WorkspaceId::generate(), Some("op")))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn unknown_workspace_is_not_found() {
        let f = fixture();
        let err = f
            .engine
            .record_usage(&ctx(), traffic(WorkspaceId::generate(), Some("op")))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound { entity: "workspace", .. }));
    }

    #[tokio::test]
    async fn negative_units_are_rejected() {
        let f = fixture();
        let mut event = traffic(f.workspace.id, Some("op"));
        event.units = -1.0;
        let err = f.engine.record_usage(&ctx(), event).await.unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[tokio::test]
    async fn batch_reports_each_event() {
        let f = fixture();
        let mut bad = traffic(f.workspace.id, Some("bad"));
        bad.units = f64::NAN;
        let results = f
            .engine
            .record_usage_batch(
                &ctx(),
                vec![
                    traffic(f.workspace.id, Some("a")),
                    bad,
                    traffic(f.workspace.id, Some("a")),
                ],
            )
            .await;

        assert!(results[0].as_ref().unwrap().created);
        assert!(matches!(results[1], Err(BillingError::Validation(_))));
        assert!(!results[2].as_ref().unwrap().created);
    }
}
