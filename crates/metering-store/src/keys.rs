//! Key encoding for the ordered key spaces.
//!
//! All multi-part keys start with the owning workspace so that prefix scans
//! stay inside one workspace. Fixed-width big-endian parts keep byte order
//! equal to logical order.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use metering_core::{
    AggregationKey, AlertId, BillingPeriod, EventId, InvoiceId, OrganizationId, ProjectId,
    WorkspaceId,
};

/// Length of an event key: workspace (16) + timestamp (8) + event id (16).
pub const EVENT_KEY_LEN: usize = 40;

/// Encode an instant as 8 bytes that sort in time order.
///
/// Nanoseconds since the epoch with the sign bit flipped; instants outside
/// the `i64` nanosecond range saturate.
#[must_use]
pub fn timestamp_bytes(ts: DateTime<Utc>) -> [u8; 8] {
    let nanos = ts.timestamp_nanos_opt().unwrap_or(if ts.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    });
    #[allow(clippy::cast_sign_loss)]
    let ordered = (nanos as u64) ^ (1 << 63);
    ordered.to_be_bytes()
}

/// Event key: `workspace_id || timestamp || event_id`.
///
/// Iterating a workspace prefix yields events in ledger order.
#[must_use]
pub fn event_key(workspace_id: &WorkspaceId, timestamp: DateTime<Utc>, event_id: &EventId) -> Vec<u8> {
    let mut key = Vec::with_capacity(EVENT_KEY_LEN);
    key.extend_from_slice(workspace_id.as_bytes());
    key.extend_from_slice(&timestamp_bytes(timestamp));
    key.extend_from_slice(&event_id.to_bytes());
    key
}

/// Smallest event key at or after `timestamp` in a workspace.
#[must_use]
pub fn event_bound(workspace_id: &WorkspaceId, timestamp: DateTime<Utc>) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(workspace_id.as_bytes());
    key.extend_from_slice(&timestamp_bytes(timestamp));
    key
}

/// Idempotency index key: `workspace_id || idempotency_key`.
#[must_use]
pub fn idempotency_key(workspace_id: &WorkspaceId, key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + key.len());
    out.extend_from_slice(workspace_id.as_bytes());
    out.extend_from_slice(key.as_bytes());
    out
}

fn day_bytes(date: NaiveDate) -> [u8; 4] {
    #[allow(clippy::cast_sign_loss)]
    let ordered = (date.num_days_from_ce() as u32) ^ (1 << 31);
    ordered.to_be_bytes()
}

fn optional_uuid(out: &mut Vec<u8>, bytes: Option<&[u8; 16]>) {
    match bytes {
        Some(bytes) => {
            out.push(1);
            out.extend_from_slice(bytes);
        }
        None => out.push(0),
    }
}

/// Storage snapshot key: `workspace_id || day || project`.
#[must_use]
pub fn snapshot_key(
    workspace_id: &WorkspaceId,
    date: NaiveDate,
    project_id: Option<&ProjectId>,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(37);
    key.extend_from_slice(workspace_id.as_bytes());
    key.extend_from_slice(&day_bytes(date));
    optional_uuid(&mut key, project_id.map(ProjectId::as_bytes));
    key
}

/// Smallest snapshot key on or after `date` in a workspace.
#[must_use]
pub fn snapshot_bound(workspace_id: &WorkspaceId, date: NaiveDate) -> Vec<u8> {
    let mut key = Vec::with_capacity(20);
    key.extend_from_slice(workspace_id.as_bytes());
    key.extend_from_slice(&day_bytes(date));
    key
}

fn period_bytes(period: &BillingPeriod) -> [u8; 4] {
    #[allow(clippy::cast_sign_loss)]
    let ordered = (period.year() as u32) * 100 + period.month();
    ordered.to_be_bytes()
}

/// Prefix shared by every aggregation of one workspace and period.
#[must_use]
pub fn aggregation_period_prefix(workspace_id: &WorkspaceId, period: &BillingPeriod) -> Vec<u8> {
    let mut out = Vec::with_capacity(37);
    out.extend_from_slice(workspace_id.as_bytes());
    out.extend_from_slice(&period_bytes(period));
    out
}

/// Aggregation key: `workspace_id || period || billing entity`.
#[must_use]
pub fn aggregation_key(key: &AggregationKey) -> Vec<u8> {
    let mut out = aggregation_period_prefix(&key.workspace_id, &key.period);
    optional_uuid(&mut out, key.billing_entity_id.as_ref().map(|id| id.as_bytes()));
    out
}

/// Invoice key.
#[must_use]
pub fn invoice_key(invoice_id: &InvoiceId) -> Vec<u8> {
    invoice_id.as_str().as_bytes().to_vec()
}

/// Workspace invoice index key: `workspace_id || invoice_id`.
#[must_use]
pub fn workspace_invoice_key(workspace_id: &WorkspaceId, invoice_id: &InvoiceId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + invoice_id.as_str().len());
    key.extend_from_slice(workspace_id.as_bytes());
    key.extend_from_slice(invoice_id.as_str().as_bytes());
    key
}

/// Extract the invoice id from a workspace invoice index key.
#[must_use]
pub fn invoice_id_from_index(key: &[u8]) -> Option<InvoiceId> {
    let raw = std::str::from_utf8(key.get(16..)?).ok()?;
    raw.parse().ok()
}

/// Alert key: `workspace_id || alert_id`.
#[must_use]
pub fn alert_key(workspace_id: &WorkspaceId, alert_id: &AlertId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(workspace_id.as_bytes());
    key.extend_from_slice(&alert_id.to_bytes());
    key
}

/// Workspace directory key.
#[must_use]
pub fn workspace_key(workspace_id: &WorkspaceId) -> Vec<u8> {
    workspace_id.as_bytes().to_vec()
}

/// Organization directory key.
#[must_use]
pub fn organization_key(organization_id: &OrganizationId) -> Vec<u8> {
    organization_id.as_bytes().to_vec()
}

/// Prefix shared by every key of a workspace.
#[must_use]
pub fn workspace_prefix(workspace_id: &WorkspaceId) -> Vec<u8> {
    workspace_id.as_bytes().to_vec()
}
