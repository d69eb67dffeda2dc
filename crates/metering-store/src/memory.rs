//! In-memory storage implementation.
//!
//! All tables sit behind one `RwLock`, so every compound write is a single
//! critical section and readers never observe half of it.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;

use metering_core::{
    AggregationKey, AlertDefinition, AlertId, BillingPeriod, Invoice, InvoiceId, InvoiceStatus, Organization,
    OrganizationId, StorageDailySnapshot, UsageAggregation, UsageEvent, Workspace, WorkspaceId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::{
    AggregationRepository, AlertRepository, AppendOutcome, DirectoryRepository, EventLedger,
    InvoiceRepository, SnapshotRepository,
};

#[derive(Default)]
struct Tables {
    events: BTreeMap<Vec<u8>, UsageEvent>,
    idempotency: HashMap<Vec<u8>, Vec<u8>>,
    snapshots: BTreeMap<Vec<u8>, StorageDailySnapshot>,
    aggregations: HashMap<AggregationKey, UsageAggregation>,
    invoices: HashMap<InvoiceId, Invoice>,
    invoices_by_workspace: BTreeMap<Vec<u8>, InvoiceId>,
    alerts: BTreeMap<Vec<u8>, AlertDefinition>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    organizations: HashMap<OrganizationId, Organization>,
}

/// Storage backed by process memory. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryStore")
            .field("events", &tables.events.len())
            .field("aggregations", &tables.aggregations.len())
            .field("invoices", &tables.invoices.len())
            .finish_non_exhaustive()
    }
}

impl EventLedger for MemoryStore {
    fn append_event(&self, event: &UsageEvent) -> Result<AppendOutcome> {
        let idem_key = keys::idempotency_key(&event.workspace_id, &event.idempotency_key);
        let mut tables = self.tables.write();

        if let Some(existing) = tables
            .idempotency
            .get(&idem_key)
            .and_then(|event_key| tables.events.get(event_key))
        {
            return Ok(AppendOutcome::Existing(existing.clone()));
        }

        let event_key = keys::event_key(&event.workspace_id, event.timestamp, &event.id);
        tables.events.insert(event_key.clone(), event.clone());
        tables.idempotency.insert(idem_key, event_key);
        Ok(AppendOutcome::Created(event.clone()))
    }

    fn find_event_by_key(
        &self,
        workspace_id: &WorkspaceId,
        idempotency_key: &str,
    ) -> Result<Option<UsageEvent>> {
        let tables = self.tables.read();
        Ok(tables
            .idempotency
            .get(&keys::idempotency_key(workspace_id, idempotency_key))
            .and_then(|event_key| tables.events.get(event_key))
            .cloned())
    }

    fn list_events(
        &self,
        workspace_id: &WorkspaceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>> {
        let lower = keys::event_bound(workspace_id, from);
        let upper = keys::event_bound(workspace_id, to);
        if lower >= upper {
            return Ok(Vec::new());
        }
        let tables = self.tables.read();
        Ok(tables
            .events
            .range(lower..upper)
            .map(|(_, event)| event.clone())
            .collect())
    }
}

impl SnapshotRepository for MemoryStore {
    fn put_snapshot(&self, snapshot: &StorageDailySnapshot) -> Result<()> {
        let key = keys::snapshot_key(
            &snapshot.workspace_id,
            snapshot.date,
            snapshot.project_id.as_ref(),
        );
        self.tables.write().snapshots.insert(key, snapshot.clone());
        Ok(())
    }

    fn list_snapshots(
        &self,
        workspace_id: &WorkspaceId,
        until: NaiveDate,
    ) -> Result<Vec<StorageDailySnapshot>> {
        let prefix = keys::workspace_prefix(workspace_id);
        let upper = keys::snapshot_bound(workspace_id, until);
        let tables = self.tables.read();
        Ok(tables
            .snapshots
            .range(prefix..upper)
            .map(|(_, snapshot)| snapshot.clone())
            .collect())
    }
}

impl AggregationRepository for MemoryStore {
    fn get_aggregation(&self, key: &AggregationKey) -> Result<Option<UsageAggregation>> {
        Ok(self.tables.read().aggregations.get(key).cloned())
    }

    fn insert_aggregation(&self, aggregation: &UsageAggregation) -> Result<()> {
        let mut tables = self.tables.write();
        let key = aggregation.key();
        if tables.aggregations.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        tables.aggregations.insert(key, aggregation.clone());
        Ok(())
    }

    fn update_aggregation(
        &self,
        aggregation: &UsageAggregation,
        expected_revision: u64,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        let stored = tables
            .aggregations
            .get_mut(&aggregation.key())
            .ok_or(StoreError::NotFound)?;
        if stored.revision != expected_revision {
            return Err(StoreError::RevisionConflict {
                expected: expected_revision,
                actual: stored.revision,
            });
        }
        *stored = aggregation.clone();
        Ok(())
    }

    fn list_period_aggregations(
        &self,
        workspace_id: &WorkspaceId,
        period: &BillingPeriod,
    ) -> Result<Vec<UsageAggregation>> {
        Ok(self
            .tables
            .read()
            .aggregations
            .values()
            .filter(|a| a.workspace_id == *workspace_id && a.period == *period)
            .cloned()
            .collect())
    }
}

impl InvoiceRepository for MemoryStore {
    fn create_invoice(
        &self,
        invoice: &Invoice,
        locked: &UsageAggregation,
        expected_revision: u64,
    ) -> Result<()> {
        let mut tables = self.tables.write();

        let stored = tables
            .aggregations
            .get(&locked.key())
            .ok_or(StoreError::NotFound)?;
        if stored.revision != expected_revision && stored.invoice_id.is_none() {
            return Err(StoreError::RevisionConflict {
                expected: expected_revision,
                actual: stored.revision,
            });
        }
        let key = locked.key();
        if let Some(existing) = tables
            .aggregations
            .values()
            .filter(|a| a.key().overlaps(&key))
            .find_map(|a| a.invoice_id.as_ref())
        {
            return Err(StoreError::DuplicateInvoice {
                invoice_id: existing.to_string(),
            });
        }

        tables.aggregations.insert(locked.key(), locked.clone());
        tables
            .invoices
            .insert(invoice.invoice_id.clone(), invoice.clone());
        tables.invoices_by_workspace.insert(
            keys::workspace_invoice_key(&invoice.workspace_id, &invoice.invoice_id),
            invoice.invoice_id.clone(),
        );
        Ok(())
    }

    fn get_invoice(&self, invoice_id: &InvoiceId) -> Result<Option<Invoice>> {
        Ok(self.tables.read().invoices.get(invoice_id).cloned())
    }

    fn list_invoices(&self, workspace_id: &WorkspaceId) -> Result<Vec<Invoice>> {
        let prefix = keys::workspace_prefix(workspace_id);
        let tables = self.tables.read();
        let mut invoices: Vec<Invoice> = tables
            .invoices_by_workspace
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(_, id)| tables.invoices.get(id).cloned())
            .collect();
        invoices.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(invoices)
    }

    fn update_invoice(&self, invoice: &Invoice, expected: InvoiceStatus) -> Result<()> {
        let mut tables = self.tables.write();
        let stored = tables
            .invoices
            .get_mut(&invoice.invoice_id)
            .ok_or(StoreError::NotFound)?;
        if stored.status != expected {
            return Err(StoreError::StatusConflict {
                expected: expected.to_string(),
                actual: stored.status.to_string(),
            });
        }
        *stored = invoice.clone();
        Ok(())
    }
}

impl AlertRepository for MemoryStore {
    fn put_alert(&self, alert: &AlertDefinition) -> Result<()> {
        let key = keys::alert_key(&alert.workspace_id, &alert.id);
        self.tables.write().alerts.insert(key, alert.clone());
        Ok(())
    }

    fn get_alert(
        &self,
        workspace_id: &WorkspaceId,
        alert_id: &AlertId,
    ) -> Result<Option<AlertDefinition>> {
        let key = keys::alert_key(workspace_id, alert_id);
        Ok(self.tables.read().alerts.get(&key).cloned())
    }

    fn list_alerts(&self, workspace_id: &WorkspaceId) -> Result<Vec<AlertDefinition>> {
        let prefix = keys::workspace_prefix(workspace_id);
        let tables = self.tables.read();
        Ok(tables
            .alerts
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(_, alert)| alert.clone())
            .collect())
    }

    fn delete_alert(&self, workspace_id: &WorkspaceId, alert_id: &AlertId) -> Result<()> {
        let key = keys::alert_key(workspace_id, alert_id);
        self.tables
            .write()
            .alerts
            .remove(&key)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn record_alert_triggered(
        &self,
        workspace_id: &WorkspaceId,
        alert_id: &AlertId,
        triggered_at: DateTime<Utc>,
    ) -> Result<()> {
        let key = keys::alert_key(workspace_id, alert_id);
        let mut tables = self.tables.write();
        let stored = tables.alerts.get_mut(&key).ok_or(StoreError::NotFound)?;
        stored.last_triggered_at = Some(triggered_at);
        Ok(())
    }
}

impl DirectoryRepository for MemoryStore {
    fn put_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.tables
            .write()
            .workspaces
            .insert(workspace.id, workspace.clone());
        Ok(())
    }

    fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Option<Workspace>> {
        Ok(self.tables.read().workspaces.get(workspace_id).cloned())
    }

    fn put_organization(&self, organization: &Organization) -> Result<()> {
        self.tables
            .write()
            .organizations
            .insert(organization.id, organization.clone());
        Ok(())
    }

    fn get_organization(&self, organization_id: &OrganizationId) -> Result<Option<Organization>> {
        Ok(self.tables.read().organizations.get(organization_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    #[test]
    fn idempotent_append() {
        conformance::idempotent_append(&MemoryStore::new());
    }

    #[test]
    fn concurrent_append_writes_once() {
        conformance::concurrent_append_writes_once(std::sync::Arc::new(MemoryStore::new()));
    }

    #[test]
    fn events_listed_in_ledger_order() {
        conformance::events_listed_in_ledger_order(&MemoryStore::new());
    }

    #[test]
    fn snapshots_replace_and_list() {
        conformance::snapshots_replace_and_list(&MemoryStore::new());
    }

    #[test]
    fn aggregation_compare_and_set() {
        conformance::aggregation_compare_and_set(&MemoryStore::new());
    }

    #[test]
    fn invoice_creation_locks_aggregation() {
        conformance::invoice_creation_locks_aggregation(&MemoryStore::new());
    }

    #[test]
    fn overlapping_scopes_share_one_invoice() {
        conformance::overlapping_scopes_share_one_invoice(&MemoryStore::new());
    }

    #[test]
    fn alert_trigger_keeps_concurrent_edit() {
        conformance::alert_trigger_keeps_concurrent_edit(&MemoryStore::new());
    }

    #[test]
    fn concurrent_invoice_creation_has_one_winner() {
        conformance::concurrent_invoice_creation_has_one_winner(std::sync::Arc::new(
            MemoryStore::new(),
        ));
    }

    #[test]
    fn invoice_status_compare_and_set() {
        conformance::invoice_status_compare_and_set(&MemoryStore::new());
    }

    #[test]
    fn alert_crud() {
        conformance::alert_crud(&MemoryStore::new());
    }

    #[test]
    fn directory_roundtrip() {
        conformance::directory_roundtrip(&MemoryStore::new());
    }
}
