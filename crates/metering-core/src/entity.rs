//! Billing entity attribution.
//!
//! A workspace is billed to its owner until its organization starts paying.
//! The switch happens at `Organization::billing_start_at`; usage is attributed
//! by when it occurred, not when it was reported, so late events land on the
//! right account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BillingEntity, BillingEntityType, OrganizationId, UserId, WorkspaceId};

/// Directory record for a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace id.
    pub id: WorkspaceId,
    /// The personal account that owns the workspace.
    pub owner_user_id: UserId,
    /// Organization the workspace belongs to, if converted.
    pub organization_id: Option<OrganizationId>,
    /// Whether writes are blocked for this workspace.
    #[serde(default)]
    pub billing_suspended: bool,
}

/// Directory record for an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Organization id.
    pub id: OrganizationId,
    /// Instant from which the organization pays for its workspaces' usage.
    pub billing_start_at: Option<DateTime<Utc>>,
    /// Whether writes are blocked for every workspace of the organization.
    #[serde(default)]
    pub billing_suspended: bool,
}

impl Workspace {
    /// The workspace owner as a billing entity.
    #[must_use]
    pub fn owner_entity(&self) -> BillingEntity {
        BillingEntity {
            id: self.owner_user_id.into(),
            entity_type: BillingEntityType::User,
        }
    }
}

/// Decide who pays for usage that occurred at `event_timestamp`.
///
/// Pass `organization = None` when the workspace has no organization or the
/// organization record could not be loaded; both bill the owner. The boundary
/// instant itself bills the organization.
#[must_use]
pub fn resolve(
    workspace: &Workspace,
    organization: Option<&Organization>,
    event_timestamp: DateTime<Utc>,
) -> BillingEntity {
    let Some(org) = organization else {
        return workspace.owner_entity();
    };

    match org.billing_start_at {
        Some(start) if event_timestamp >= start => BillingEntity {
            id: org.id.into(),
            entity_type: BillingEntityType::Organization,
        },
        _ => workspace.owner_entity(),
    }
}
