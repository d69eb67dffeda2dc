//! Daily storage snapshots.

use chrono::{NaiveDate, Utc};

use metering_core::period::start_of_day;
use metering_core::{BillingError, ProjectId, Result, StorageDailySnapshot, WorkspaceId};

use super::MeteringEngine;
use crate::authz::Action;
use crate::context::RequestContext;

/// A storage observation for one UTC day.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStorageSnapshot {
    /// Workspace.
    pub workspace_id: WorkspaceId,
    /// Project, for per-project series.
    pub project_id: Option<ProjectId>,
    /// Gigabytes held.
    pub storage_gb: f64,
    /// Day observed.
    pub date: NaiveDate,
}

impl MeteringEngine {
    /// Record (or replace) the storage held on one day.
    ///
    /// The payer is resolved at the start of that day.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `NotFound`, `BillingSuspended`, or `Validation` for a
    /// negative or non-finite size.
    pub async fn record_storage_snapshot(
        &self,
        ctx: &RequestContext,
        new: NewStorageSnapshot,
    ) -> Result<StorageDailySnapshot> {
        self.authorize(ctx, &new.workspace_id, Action::RecordStorage)
            .await?;
        let (workspace, organization) = self.active_workspace(ctx, &new.workspace_id)?;

        if !new.storage_gb.is_finite() || new.storage_gb < 0.0 {
            return Err(BillingError::Validation(
                "storage_gb must be a non-negative number".into(),
            ));
        }

        let snapshot = StorageDailySnapshot {
            workspace_id: new.workspace_id,
            project_id: new.project_id,
            storage_gb: new.storage_gb,
            date: new.date,
            billing_entity: Self::billing_entity(
                &workspace,
                organization.as_ref(),
                start_of_day(new.date),
            ),
            recorded_at: Utc::now(),
        };
        self.store.put_snapshot(&snapshot)?;

        tracing::debug!(
            workspace_id = %snapshot.workspace_id,
            project_id = ?snapshot.project_id,
            date = %snapshot.date,
            storage_gb = snapshot.storage_gb,
            "Storage snapshot recorded"
        );
        Ok(snapshot)
    }
}
