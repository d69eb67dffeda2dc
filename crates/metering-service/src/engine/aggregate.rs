//! Period aggregator.

use chrono::Utc;

use metering_core::{
    compute_totals, AggregationKey, BillingEntityId, BillingError, BillingPeriod, EntityScope,
    Organization, PeriodTotals, Result, UsageAggregation, Workspace, WorkspaceId,
};
use metering_store::StoreError;

use super::{MeteringEngine, MAX_WRITE_ATTEMPTS};
use crate::authz::Action;
use crate::context::RequestContext;

impl MeteringEngine {
    /// Recompute and store the aggregation for a period.
    ///
    /// Writes are compare-and-set on the aggregation's revision. A lost race
    /// re-reads the record, re-checks the lock and recomputes.
    ///
    /// # Errors
    ///
    /// - `PeriodLocked` if an invoice has locked this aggregation or one
    ///   whose scope overlaps it (the whole workspace covers every entity).
    /// - `Conflict` if every attempt lost a race.
    pub async fn calculate_aggregation(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        period: BillingPeriod,
        billing_entity_id: Option<BillingEntityId>,
    ) -> Result<UsageAggregation> {
        self.authorize(ctx, &workspace_id, Action::CalculateAggregation)
            .await?;
        let workspace = self.workspace(ctx, &workspace_id)?;
        let organization = self.organization_for(ctx, &workspace);

        let key = AggregationKey::new(workspace_id, period, billing_entity_id);

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            self.ensure_period_open(&key)?;
            let existing = self.store.get_aggregation(&key)?;

            let totals = self.period_totals(&key, &workspace, organization.as_ref())?;
            let now = Utc::now();

            let written = match existing {
                None => {
                    let aggregation = UsageAggregation::new(key, totals, now);
                    self.store
                        .insert_aggregation(&aggregation)
                        .map(|()| aggregation)
                }
                Some(mut aggregation) => {
                    let expected = aggregation.revision;
                    aggregation.apply_totals(totals, now)?;
                    self.store
                        .update_aggregation(&aggregation, expected)
                        .map(|()| aggregation)
                }
            };

            match written {
                Ok(aggregation) => {
                    tracing::info!(
                        aggregation = %key,
                        revision = aggregation.revision,
                        traffic_total_gb = aggregation.traffic_total_gb,
                        storage_avg_gb = aggregation.storage_avg_gb,
                        compute_total_units = aggregation.compute_total_units,
                        event_count = aggregation.event_count,
                        "Aggregation calculated"
                    );
                    return Ok(aggregation);
                }
                Err(StoreError::AlreadyExists | StoreError::RevisionConflict { .. }) => {
                    tracing::debug!(aggregation = %key, attempt, "Aggregation write lost a race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(BillingError::Conflict(format!(
            "aggregation {key} kept changing after {MAX_WRITE_ATTEMPTS} attempts"
        )))
    }

    /// Read the stored aggregation without recomputing.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it was never calculated.
    pub async fn get_aggregation(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        period: BillingPeriod,
        billing_entity_id: Option<BillingEntityId>,
    ) -> Result<UsageAggregation> {
        self.authorize(ctx, &workspace_id, Action::ReadUsage).await?;

        let key = AggregationKey::new(workspace_id, period, billing_entity_id);
        self.store
            .get_aggregation(&key)?
            .ok_or_else(|| BillingError::not_found("aggregation", key))
    }

    /// Fail if this key, or any scope overlapping it, is invoiced.
    fn ensure_period_open(&self, key: &AggregationKey) -> Result<()> {
        self.store
            .list_period_aggregations(&key.workspace_id, &key.period)?
            .iter()
            .filter(|aggregation| aggregation.key().overlaps(key))
            .try_for_each(UsageAggregation::ensure_unlocked)
    }

    fn period_totals(
        &self,
        key: &AggregationKey,
        workspace: &Workspace,
        organization: Option<&Organization>,
    ) -> Result<PeriodTotals> {
        let events = self
            .store
            .list_events(&key.workspace_id, key.period.start(), key.period.end())?;
        // Snapshots from before the period carry into its first days.
        let snapshots = self
            .store
            .list_snapshots(&key.workspace_id, key.period.next_first_day())?;

        let scope = key.billing_entity_id.map(|entity_id| EntityScope {
            entity_id,
            workspace,
            organization,
        });
        Ok(compute_totals(&key.period, &events, &snapshots, scope))
    }
}
