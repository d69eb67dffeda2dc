//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the repository
//! traits.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tracing::debug;

use metering_core::{
    AggregationKey, AlertDefinition, AlertId, BillingPeriod, Invoice, InvoiceId, InvoiceStatus, Organization,
    OrganizationId, StorageDailySnapshot, UsageAggregation, UsageEvent, Workspace, WorkspaceId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::locks::KeyLocks;
use crate::schema::{all_column_families, cf};
use crate::{
    AggregationRepository, AlertRepository, AppendOutcome, DirectoryRepository, EventLedger,
    InvoiceRepository, SnapshotRepository,
};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    locks: KeyLocks,
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn lock_key(kind: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(kind.len() + key.len());
    out.extend_from_slice(kind);
    out.extend_from_slice(key);
    out
}

/// Aggregation writes lock the whole period so that invoicing one scope
/// sees every other scope's current state.
fn period_lock_key(key: &AggregationKey) -> Vec<u8> {
    lock_key(
        b"agg",
        &keys::aggregation_period_prefix(&key.workspace_id, &key.period),
    )
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(db),
            locks: KeyLocks::new(),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;
        self.db.put_cf(&cf, key, value).map_err(db_err)
    }

    /// Values in `[lower, upper)`, in key order.
    fn scan_range<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        lower: &[u8],
        upper: &[u8],
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(lower, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(db_err)?;
            if &*key >= upper {
                break;
            }
            out.push(Self::deserialize(&value)?);
        }
        Ok(out)
    }

    /// Keys and values starting with `prefix`, in key order.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }
}

impl EventLedger for RocksStore {
    fn append_event(&self, event: &UsageEvent) -> Result<AppendOutcome> {
        let idem_key = keys::idempotency_key(&event.workspace_id, &event.idempotency_key);

        self.locks.with_lock(&lock_key(b"evt", &idem_key), || -> Result<AppendOutcome> {
            let cf_idem = self.cf(cf::EVENT_IDEMPOTENCY)?;
            if let Some(event_key) = self.db.get_cf(&cf_idem, &idem_key).map_err(db_err)? {
                let existing: UsageEvent = self
                    .get(cf::EVENTS, &event_key)?
                    .ok_or_else(|| StoreError::Database("idempotency index points nowhere".into()))?;
                debug!(
                    workspace_id = %event.workspace_id,
                    idempotency_key = %event.idempotency_key,
                    "Duplicate usage event"
                );
                return Ok(AppendOutcome::Existing(existing));
            }

            let cf_events = self.cf(cf::EVENTS)?;
            let event_key = keys::event_key(&event.workspace_id, event.timestamp, &event.id);
            let value = Self::serialize(event)?;

            // Write atomically
            let mut batch = WriteBatch::default();
            batch.put_cf(&cf_events, &event_key, &value);
            batch.put_cf(&cf_idem, &idem_key, &event_key);
            self.db.write(batch).map_err(db_err)?;

            Ok(AppendOutcome::Created(event.clone()))
        })
    }

    fn find_event_by_key(
        &self,
        workspace_id: &WorkspaceId,
        idempotency_key: &str,
    ) -> Result<Option<UsageEvent>> {
        let cf_idem = self.cf(cf::EVENT_IDEMPOTENCY)?;
        let idem_key = keys::idempotency_key(workspace_id, idempotency_key);
        match self.db.get_cf(&cf_idem, idem_key).map_err(db_err)? {
            Some(event_key) => self.get(cf::EVENTS, &event_key),
            None => Ok(None),
        }
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
        self.scan_range(cf::EVENTS, &lower, &upper)
    }
}

impl SnapshotRepository for RocksStore {
    fn put_snapshot(&self, snapshot: &StorageDailySnapshot) -> Result<()> {
        let key = keys::snapshot_key(
            &snapshot.workspace_id,
            snapshot.date,
            snapshot.project_id.as_ref(),
        );
        self.put(cf::STORAGE_SNAPSHOTS, &key, snapshot)
    }

    fn list_snapshots(
        &self,
        workspace_id: &WorkspaceId,
        until: NaiveDate,
    ) -> Result<Vec<StorageDailySnapshot>> {
        let lower = keys::workspace_prefix(workspace_id);
        let upper = keys::snapshot_bound(workspace_id, until);
        self.scan_range(cf::STORAGE_SNAPSHOTS, &lower, &upper)
    }
}

impl AggregationRepository for RocksStore {
    fn get_aggregation(&self, key: &AggregationKey) -> Result<Option<UsageAggregation>> {
        self.get(cf::AGGREGATIONS, &keys::aggregation_key(key))
    }

    fn insert_aggregation(&self, aggregation: &UsageAggregation) -> Result<()> {
        let key = keys::aggregation_key(&aggregation.key());
        self.locks.with_lock(&period_lock_key(&aggregation.key()), || -> Result<()> {
            if self.get::<UsageAggregation>(cf::AGGREGATIONS, &key)?.is_some() {
                return Err(StoreError::AlreadyExists);
            }
            self.put(cf::AGGREGATIONS, &key, aggregation)
        })
    }

    fn update_aggregation(
        &self,
        aggregation: &UsageAggregation,
        expected_revision: u64,
    ) -> Result<()> {
        let key = keys::aggregation_key(&aggregation.key());
        self.locks.with_lock(&period_lock_key(&aggregation.key()), || -> Result<()> {
            let stored: UsageAggregation = self
                .get(cf::AGGREGATIONS, &key)?
                .ok_or(StoreError::NotFound)?;
            if stored.revision != expected_revision {
                return Err(StoreError::RevisionConflict {
                    expected: expected_revision,
                    actual: stored.revision,
                });
            }
            self.put(cf::AGGREGATIONS, &key, aggregation)
        })
    }

    fn list_period_aggregations(
        &self,
        workspace_id: &WorkspaceId,
        period: &BillingPeriod,
    ) -> Result<Vec<UsageAggregation>> {
        let prefix = keys::aggregation_period_prefix(workspace_id, period);
        self.scan_prefix(cf::AGGREGATIONS, &prefix)?
            .into_iter()
            .map(|(_, value)| Self::deserialize(&value))
            .collect()
    }
}

impl InvoiceRepository for RocksStore {
    fn create_invoice(
        &self,
        invoice: &Invoice,
        locked: &UsageAggregation,
        expected_revision: u64,
    ) -> Result<()> {
        let key = locked.key();
        let agg_key = keys::aggregation_key(&key);
        self.locks.with_lock(&period_lock_key(&key), || -> Result<()> {
            let stored: UsageAggregation = self
                .get(cf::AGGREGATIONS, &agg_key)?
                .ok_or(StoreError::NotFound)?;
            if stored.revision != expected_revision && stored.invoice_id.is_none() {
                return Err(StoreError::RevisionConflict {
                    expected: expected_revision,
                    actual: stored.revision,
                });
            }
            let siblings = self.list_period_aggregations(&key.workspace_id, &key.period)?;
            if let Some(existing) = siblings
                .iter()
                .filter(|a| a.key().overlaps(&key))
                .find_map(|a| a.invoice_id.as_ref())
            {
                return Err(StoreError::DuplicateInvoice {
                    invoice_id: existing.to_string(),
                });
            }

            let cf_agg = self.cf(cf::AGGREGATIONS)?;
            let cf_inv = self.cf(cf::INVOICES)?;
            let cf_by_ws = self.cf(cf::INVOICES_BY_WORKSPACE)?;

            let invoice_key = keys::invoice_key(&invoice.invoice_id);
            let index_key = keys::workspace_invoice_key(&invoice.workspace_id, &invoice.invoice_id);
            let agg_value = Self::serialize(locked)?;
            let invoice_value = Self::serialize(invoice)?;

            // Write atomically
            let mut batch = WriteBatch::default();
            batch.put_cf(&cf_inv, &invoice_key, &invoice_value);
            batch.put_cf(&cf_by_ws, &index_key, []); // Index entry (empty value)
            batch.put_cf(&cf_agg, &agg_key, &agg_value);
            self.db.write(batch).map_err(db_err)
        })
    }

    fn get_invoice(&self, invoice_id: &InvoiceId) -> Result<Option<Invoice>> {
        self.get(cf::INVOICES, &keys::invoice_key(invoice_id))
    }

    fn list_invoices(&self, workspace_id: &WorkspaceId) -> Result<Vec<Invoice>> {
        let prefix = keys::workspace_prefix(workspace_id);
        let mut invoices = Vec::new();
        for (key, _) in self.scan_prefix(cf::INVOICES_BY_WORKSPACE, &prefix)? {
            let Some(invoice_id) = keys::invoice_id_from_index(&key) else {
                continue;
            };
            if let Some(invoice) = self.get_invoice(&invoice_id)? {
                invoices.push(invoice);
            }
        }
        invoices.sort_by(|a: &Invoice, b: &Invoice| a.created_at.cmp(&b.created_at));
        Ok(invoices)
    }

    fn update_invoice(&self, invoice: &Invoice, expected: InvoiceStatus) -> Result<()> {
        let key = keys::invoice_key(&invoice.invoice_id);
        self.locks.with_lock(&lock_key(b"inv", &key), || -> Result<()> {
            let stored: Invoice = self.get(cf::INVOICES, &key)?.ok_or(StoreError::NotFound)?;
            if stored.status != expected {
                return Err(StoreError::StatusConflict {
                    expected: expected.to_string(),
                    actual: stored.status.to_string(),
                });
            }
            self.put(cf::INVOICES, &key, invoice)
        })
    }
}

impl AlertRepository for RocksStore {
    fn put_alert(&self, alert: &AlertDefinition) -> Result<()> {
        let key = keys::alert_key(&alert.workspace_id, &alert.id);
        self.locks
            .with_lock(&lock_key(b"alr", &key), || self.put(cf::ALERTS, &key, alert))
    }

    fn get_alert(
        &self,
        workspace_id: &WorkspaceId,
        alert_id: &AlertId,
    ) -> Result<Option<AlertDefinition>> {
        self.get(cf::ALERTS, &keys::alert_key(workspace_id, alert_id))
    }

    fn list_alerts(&self, workspace_id: &WorkspaceId) -> Result<Vec<AlertDefinition>> {
        self.scan_prefix(cf::ALERTS, &keys::workspace_prefix(workspace_id))?
            .into_iter()
            .map(|(_, value)| Self::deserialize(&value))
            .collect()
    }

    fn delete_alert(&self, workspace_id: &WorkspaceId, alert_id: &AlertId) -> Result<()> {
        let key = keys::alert_key(workspace_id, alert_id);
        self.locks.with_lock(&lock_key(b"alr", &key), || -> Result<()> {
            let cf = self.cf(cf::ALERTS)?;
            if self.db.get_cf(&cf, &key).map_err(db_err)?.is_none() {
                return Err(StoreError::NotFound);
            }
            self.db.delete_cf(&cf, &key).map_err(db_err)
        })
    }

    fn record_alert_triggered(
        &self,
        workspace_id: &WorkspaceId,
        alert_id: &AlertId,
        triggered_at: DateTime<Utc>,
    ) -> Result<()> {
        let key = keys::alert_key(workspace_id, alert_id);
        self.locks.with_lock(&lock_key(b"alr", &key), || -> Result<()> {
            let mut stored: AlertDefinition =
                self.get(cf::ALERTS, &key)?.ok_or(StoreError::NotFound)?;
            stored.last_triggered_at = Some(triggered_at);
            self.put(cf::ALERTS, &key, &stored)
        })
    }
}

impl DirectoryRepository for RocksStore {
    fn put_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.put(cf::WORKSPACES, &keys::workspace_key(&workspace.id), workspace)
    }

    fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Option<Workspace>> {
        self.get(cf::WORKSPACES, &keys::workspace_key(workspace_id))
    }

    fn put_organization(&self, organization: &Organization) -> Result<()> {
        self.put(
            cf::ORGANIZATIONS,
            &keys::organization_key(&organization.id),
            organization,
        )
    }

    fn get_organization(&self, organization_id: &OrganizationId) -> Result<Option<Organization>> {
        self.get(cf::ORGANIZATIONS, &keys::organization_key(organization_id))
    }
}
