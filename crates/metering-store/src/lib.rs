//! Storage layer for the metering engine.
//!
//! This crate persists the usage ledger, storage snapshots, aggregations,
//! invoices, alert definitions and the workspace/organization directory.
//!
//! # Backends
//!
//! - [`RocksStore`]: `RocksDB` with one column family per record kind and CBOR
//!   values (feature `rocksdb-backend`, on by default).
//! - [`MemoryStore`]: in-process maps, for tests and ephemeral deployments.
//!
//! # Atomicity
//!
//! Compound writes (event + idempotency index, invoice + aggregation lock)
//! land in one `WriteBatch` (or one critical section in memory). Read-check-
//! write sequences run under a per-key lock, so writers of different keys
//! never wait on each other.
//!
//! # Example
//!
//! ```no_run
//! use metering_store::{DirectoryRepository, RocksStore};
//! use metering_core::{UserId, Workspace, WorkspaceId};
//!
//! let store = RocksStore::open("/tmp/metering-db").unwrap();
//!
//! let workspace = Workspace {
//!     id: WorkspaceId::generate(),
//!     owner_user_id: UserId::generate(),
//!     organization_id: None,
//!     billing_suspended: false,
//! };
//! store.put_workspace(&workspace).unwrap();
//!
//! let retrieved = store.get_workspace(&workspace.id).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod locks;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use locks::KeyLocks;
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, NaiveDate, Utc};
use metering_core::{
    AggregationKey, AlertDefinition, AlertId, BillingPeriod, Invoice, InvoiceId, InvoiceStatus, Organization,
    OrganizationId, StorageDailySnapshot, UsageAggregation, UsageEvent, Workspace, WorkspaceId,
};

/// Result of appending to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The event was written.
    Created(UsageEvent),
    /// An event with the same idempotency key already existed; it is
    /// returned unchanged and nothing was written.
    Existing(UsageEvent),
}

impl AppendOutcome {
    /// The stored event.
    #[must_use]
    pub fn into_event(self) -> UsageEvent {
        match self {
            Self::Created(event) | Self::Existing(event) => event,
        }
    }

    /// Whether this call wrote the event.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// The append-only usage ledger.
pub trait EventLedger: Send + Sync {
    /// Append an event unless its idempotency key is already taken in the
    /// workspace.
    ///
    /// The check and the write happen under one per-key lock, so concurrent
    /// retries with the same key append exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_event(&self, event: &UsageEvent) -> Result<AppendOutcome>;

    /// Look up an event by idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_event_by_key(
        &self,
        workspace_id: &WorkspaceId,
        idempotency_key: &str,
    ) -> Result<Option<UsageEvent>>;

    /// Events with `from <= timestamp < to`, in ledger order
    /// (timestamp, then event id).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_events(
        &self,
        workspace_id: &WorkspaceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>>;
}

/// Daily storage snapshots.
pub trait SnapshotRepository: Send + Sync {
    /// Insert or replace the snapshot for its (workspace, day, project).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_snapshot(&self, snapshot: &StorageDailySnapshot) -> Result<()>;

    /// All snapshots of a workspace dated before `until`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_snapshots(
        &self,
        workspace_id: &WorkspaceId,
        until: NaiveDate,
    ) -> Result<Vec<StorageDailySnapshot>>;
}

/// Aggregation records with optimistic concurrency.
pub trait AggregationRepository: Send + Sync {
    /// Get an aggregation by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_aggregation(&self, key: &AggregationKey) -> Result<Option<UsageAggregation>>;

    /// Insert a new aggregation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the key is taken.
    fn insert_aggregation(&self, aggregation: &UsageAggregation) -> Result<()>;

    /// Replace an aggregation if the stored revision equals
    /// `expected_revision`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the key is missing.
    /// - `StoreError::RevisionConflict` if another writer got there first.
    fn update_aggregation(
        &self,
        aggregation: &UsageAggregation,
        expected_revision: u64,
    ) -> Result<()>;

    /// Every aggregation of a workspace and period, whatever its entity scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_period_aggregations(
        &self,
        workspace_id: &WorkspaceId,
        period: &BillingPeriod,
    ) -> Result<Vec<UsageAggregation>>;
}

/// Invoices.
pub trait InvoiceRepository: Send + Sync {
    /// Write a draft invoice and the aggregation it locks in one atomic step.
    ///
    /// `locked` is the aggregation with the invoice linked; it is written only
    /// if the stored one is still at `expected_revision` and no aggregation
    /// whose scope overlaps it (see `AggregationKey::overlaps`) is invoiced.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the aggregation is missing.
    /// - `StoreError::DuplicateInvoice` if it or an overlapping scope already
    ///   links an invoice.
    /// - `StoreError::RevisionConflict` if it changed since it was read.
    fn create_invoice(
        &self,
        invoice: &Invoice,
        locked: &UsageAggregation,
        expected_revision: u64,
    ) -> Result<()>;

    /// Get an invoice by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_invoice(&self, invoice_id: &InvoiceId) -> Result<Option<Invoice>>;

    /// Invoices of a workspace, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_invoices(&self, workspace_id: &WorkspaceId) -> Result<Vec<Invoice>>;

    /// Replace an invoice if its stored status equals `expected`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the invoice is missing.
    /// - `StoreError::StatusConflict` if the status moved meanwhile.
    fn update_invoice(&self, invoice: &Invoice, expected: InvoiceStatus) -> Result<()>;
}

/// Alert definitions.
pub trait AlertRepository: Send + Sync {
    /// Insert or replace an alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_alert(&self, alert: &AlertDefinition) -> Result<()>;

    /// Get an alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_alert(&self, workspace_id: &WorkspaceId, alert_id: &AlertId)
        -> Result<Option<AlertDefinition>>;

    /// Alerts of a workspace, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_alerts(&self, workspace_id: &WorkspaceId) -> Result<Vec<AlertDefinition>>;

    /// Delete an alert.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the alert doesn't exist.
    fn delete_alert(&self, workspace_id: &WorkspaceId, alert_id: &AlertId) -> Result<()>;

    /// Set only `last_triggered_at` of a stored alert, leaving every other
    /// field as the latest writer left it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the alert was deleted.
    fn record_alert_triggered(
        &self,
        workspace_id: &WorkspaceId,
        alert_id: &AlertId,
        triggered_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Workspace and organization records read by the billing entity resolver.
pub trait DirectoryRepository: Send + Sync {
    /// Insert or update a workspace record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_workspace(&self, workspace: &Workspace) -> Result<()>;

    /// Get a workspace record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Option<Workspace>>;

    /// Insert or update an organization record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_organization(&self, organization: &Organization) -> Result<()>;

    /// Get an organization record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_organization(&self, organization_id: &OrganizationId)
        -> Result<Option<Organization>>;
}

/// Every repository, as one object.
pub trait Store:
    EventLedger
    + SnapshotRepository
    + AggregationRepository
    + InvoiceRepository
    + AlertRepository
    + DirectoryRepository
{
}

impl<T> Store for T where
    T: EventLedger
        + SnapshotRepository
        + AggregationRepository
        + InvoiceRepository
        + AlertRepository
        + DirectoryRepository
{
}

#[cfg(test)]
pub(crate) mod conformance;
