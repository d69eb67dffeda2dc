//! The metering engine.
//!
//! Every public operation takes a [`RequestContext`], asks the authorizer
//! first, then works against the store. The engine holds no per-request
//! state of its own.

mod aggregate;
mod alerts;
mod export;
mod ingest;
mod invoice;
mod snapshots;

pub use ingest::IngestOutcome;
pub use snapshots::NewStorageSnapshot;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use metering_core::{
    entity, BillingEntity, BillingError, Organization, PricingConfig, Result, Workspace,
    WorkspaceId,
};
use metering_store::Store;

use crate::authz::{Action, Authorizer};
use crate::context::RequestContext;
use crate::notify::Notifier;

/// Attempts at a compare-and-set write before giving up with a conflict.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// Usage metering and billing operations.
pub struct MeteringEngine {
    store: Arc<dyn Store>,
    authorizer: Arc<dyn Authorizer>,
    notifier: Arc<dyn Notifier>,
    pricing: PricingConfig,
    alert_cooldown: chrono::Duration,
}

impl std::fmt::Debug for MeteringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteringEngine")
            .field("pricing", &self.pricing)
            .field("alert_cooldown", &self.alert_cooldown)
            .finish_non_exhaustive()
    }
}

impl MeteringEngine {
    /// Wire an engine from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        authorizer: Arc<dyn Authorizer>,
        notifier: Arc<dyn Notifier>,
        pricing: PricingConfig,
        alert_cooldown: chrono::Duration,
    ) -> Self {
        Self {
            store,
            authorizer,
            notifier,
            pricing,
            alert_cooldown,
        }
    }

    /// Pricing in effect.
    #[must_use]
    pub const fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    /// Insert or replace a workspace directory record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn put_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.store.put_workspace(workspace)?;
        tracing::info!(
            workspace_id = %workspace.id,
            organization_id = ?workspace.organization_id,
            billing_suspended = workspace.billing_suspended,
            "Workspace record updated"
        );
        Ok(())
    }

    /// Insert or replace an organization directory record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn put_organization(&self, organization: &Organization) -> Result<()> {
        self.store.put_organization(organization)?;
        tracing::info!(
            organization_id = %organization.id,
            billing_start_at = ?organization.billing_start_at,
            billing_suspended = organization.billing_suspended,
            "Organization record updated"
        );
        Ok(())
    }

    async fn authorize(
        &self,
        ctx: &RequestContext,
        workspace_id: &WorkspaceId,
        action: Action,
    ) -> Result<()> {
        let allowed = match ctx.decision(*workspace_id, action) {
            Some(allowed) => allowed,
            None => {
                let allowed = self
                    .authorizer
                    .is_allowed(ctx.caller(), workspace_id, action)
                    .await?;
                ctx.remember_decision(*workspace_id, action, allowed);
                allowed
            }
        };

        if allowed {
            Ok(())
        } else {
            tracing::info!(
                caller = %ctx.caller(),
                workspace_id = %workspace_id,
                action = %action,
                "Operation denied"
            );
            Err(BillingError::Unauthorized(format!(
                "{} may not {action} on workspace {workspace_id}",
                ctx.caller()
            )))
        }
    }

    fn workspace(&self, ctx: &RequestContext, workspace_id: &WorkspaceId) -> Result<Workspace> {
        if let Some(workspace) = ctx.workspace(workspace_id) {
            return Ok(workspace);
        }
        let workspace = self
            .store
            .get_workspace(workspace_id)?
            .ok_or_else(|| BillingError::not_found("workspace", workspace_id))?;
        ctx.remember_workspace(&workspace);
        Ok(workspace)
    }

    /// The workspace's organization, or `None` when it has none or the
    /// lookup fails. Failures are logged, never returned.
    fn organization_for(&self, ctx: &RequestContext, workspace: &Workspace) -> Option<Organization> {
        let organization_id = workspace.organization_id?;
        if let Some(cached) = ctx.organization(&organization_id) {
            return cached;
        }

        let organization = match self.store.get_organization(&organization_id) {
            Ok(Some(organization)) => Some(organization),
            Ok(None) => {
                tracing::warn!(
                    workspace_id = %workspace.id,
                    organization_id = %organization_id,
                    "Organization record missing, billing workspace owner"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    workspace_id = %workspace.id,
                    organization_id = %organization_id,
                    error = %e,
                    "Organization lookup failed, billing workspace owner"
                );
                None
            }
        };
        ctx.remember_organization(organization_id, organization.clone());
        organization
    }

    fn ensure_active(workspace: &Workspace, organization: Option<&Organization>) -> Result<()> {
        if workspace.billing_suspended || organization.is_some_and(|org| org.billing_suspended) {
            return Err(BillingError::BillingSuspended {
                workspace_id: workspace.id.to_string(),
            });
        }
        Ok(())
    }

    /// Load the workspace, reject suspended accounts and return the entity
    /// resolver's inputs.
    fn active_workspace(
        &self,
        ctx: &RequestContext,
        workspace_id: &WorkspaceId,
    ) -> Result<(Workspace, Option<Organization>)> {
        let workspace = self.workspace(ctx, workspace_id)?;
        let organization = self.organization_for(ctx, &workspace);
        Self::ensure_active(&workspace, organization.as_ref())?;
        Ok((workspace, organization))
    }

    fn billing_entity(
        workspace: &Workspace,
        organization: Option<&Organization>,
        at: DateTime<Utc>,
    ) -> BillingEntity {
        entity::resolve(workspace, organization, at)
    }
}
