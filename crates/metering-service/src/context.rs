//! Per-request state.

use std::collections::HashMap;

use parking_lot::Mutex;

use metering_core::{Organization, OrganizationId, Workspace, WorkspaceId};

use crate::authz::Action;

/// Created for each inbound request and dropped with it.
///
/// Caches authorization decisions and directory lookups so a batch touching
/// one workspace asks the oracle and the store once. Nothing here outlives
/// the request.
#[derive(Debug)]
pub struct RequestContext {
    caller: String,
    decisions: Mutex<HashMap<(WorkspaceId, Action), bool>>,
    workspaces: Mutex<HashMap<WorkspaceId, Workspace>>,
    organizations: Mutex<HashMap<OrganizationId, Option<Organization>>>,
}

impl RequestContext {
    /// Create a context for `caller`.
    #[must_use]
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            decisions: Mutex::new(HashMap::new()),
            workspaces: Mutex::new(HashMap::new()),
            organizations: Mutex::new(HashMap::new()),
        }
    }

    /// Who is calling.
    #[must_use]
    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub(crate) fn decision(&self, workspace_id: WorkspaceId, action: Action) -> Option<bool> {
        self.decisions.lock().get(&(workspace_id, action)).copied()
    }

    pub(crate) fn remember_decision(&self, workspace_id: WorkspaceId, action: Action, allowed: bool) {
        self.decisions.lock().insert((workspace_id, action), allowed);
    }

    pub(crate) fn workspace(&self, workspace_id: &WorkspaceId) -> Option<Workspace> {
        self.workspaces.lock().get(workspace_id).cloned()
    }

    pub(crate) fn remember_workspace(&self, workspace: &Workspace) {
        self.workspaces.lock().insert(workspace.id, workspace.clone());
    }

    /// `Some(None)` means the lookup was done and found nothing.
    pub(crate) fn organization(&self, organization_id: &OrganizationId) -> Option<Option<Organization>> {
        self.organizations.lock().get(organization_id).cloned()
    }

    pub(crate) fn remember_organization(
        &self,
        organization_id: OrganizationId,
        organization: Option<Organization>,
    ) {
        self.organizations.lock().insert(organization_id, organization);
    }
}
