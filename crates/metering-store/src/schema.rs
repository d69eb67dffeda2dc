//! Column families of the `RocksDB` backend.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Usage ledger, keyed by `workspace_id || timestamp || event_id`.
    pub const EVENTS: &str = "events";

    /// Idempotency index, keyed by `workspace_id || idempotency_key`.
    /// Value is the event key.
    pub const EVENT_IDEMPOTENCY: &str = "event_idempotency";

    /// Daily storage snapshots, keyed by `workspace_id || day || project`.
    pub const STORAGE_SNAPSHOTS: &str = "storage_snapshots";

    /// Aggregations, keyed by `workspace_id || period || billing entity`.
    pub const AGGREGATIONS: &str = "aggregations";

    /// Invoices, keyed by invoice id.
    pub const INVOICES: &str = "invoices";

    /// Index: invoices by workspace, keyed by `workspace_id || invoice_id`.
    /// Value is empty (index only).
    pub const INVOICES_BY_WORKSPACE: &str = "invoices_by_workspace";

    /// Alert definitions, keyed by `workspace_id || alert_id`.
    pub const ALERTS: &str = "alerts";

    /// Workspace directory records, keyed by `workspace_id`.
    pub const WORKSPACES: &str = "workspaces";

    /// Organization directory records, keyed by `organization_id`.
    pub const ORGANIZATIONS: &str = "organizations";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::EVENTS,
        cf::EVENT_IDEMPOTENCY,
        cf::STORAGE_SNAPSHOTS,
        cf::AGGREGATIONS,
        cf::INVOICES,
        cf::INVOICES_BY_WORKSPACE,
        cf::ALERTS,
        cf::WORKSPACES,
        cf::ORGANIZATIONS,
    ]
}
