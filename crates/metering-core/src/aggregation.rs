//! Monthly usage aggregation.
//!
//! An aggregation rolls one workspace's ledger events for one period (and
//! optionally one billing entity) into totals. It may be recomputed freely
//! until an invoice locks it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::entity::{self, Organization, Workspace};
use crate::period::start_of_day;
use crate::usage::bytes_to_gb;
use crate::{
    AggregationId, BillingEntityId, BillingError, BillingPeriod, InvoiceId, ProjectId,
    ResourceType, StorageDailySnapshot, UsageEvent, WorkspaceId,
};

/// Identifies one aggregation: at most one record exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationKey {
    /// Workspace.
    pub workspace_id: WorkspaceId,
    /// Month.
    pub period: BillingPeriod,
    /// Billing entity filter; `None` aggregates every entity.
    pub billing_entity_id: Option<BillingEntityId>,
}

impl AggregationKey {
    /// Create a key.
    #[must_use]
    pub const fn new(
        workspace_id: WorkspaceId,
        period: BillingPeriod,
        billing_entity_id: Option<BillingEntityId>,
    ) -> Self {
        Self {
            workspace_id,
            period,
            billing_entity_id,
        }
    }

    /// Whether both keys can bill the same usage.
    ///
    /// The whole-workspace scope covers every entity; two distinct entity
    /// scopes of one period are disjoint.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.workspace_id == other.workspace_id
            && self.period == other.period
            && match (self.billing_entity_id, other.billing_entity_id) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.billing_entity_id {
            Some(entity) => write!(f, "{}/{}/{entity}", self.workspace_id, self.period),
            None => write!(f, "{}/{}", self.workspace_id, self.period),
        }
    }
}

/// Computed totals for one aggregation key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotals {
    /// Traffic in GB.
    pub traffic_total_gb: f64,
    /// Time-weighted average storage in GB.
    pub storage_avg_gb: f64,
    /// Weighted compute units.
    pub compute_total_units: f64,
    /// Ledger events that fell in the window.
    pub event_count: u64,
}

/// A monthly usage rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageAggregation {
    /// Snapshot id referenced by invoices.
    pub id: AggregationId,
    /// Workspace.
    pub workspace_id: WorkspaceId,
    /// Month.
    pub period: BillingPeriod,
    /// Billing entity filter; `None` aggregates every entity.
    pub billing_entity_id: Option<BillingEntityId>,
    /// Traffic in GB.
    pub traffic_total_gb: f64,
    /// Time-weighted average storage in GB.
    pub storage_avg_gb: f64,
    /// Weighted compute units.
    pub compute_total_units: f64,
    /// Ledger events that fell in the window.
    pub event_count: u64,
    /// Locked by an invoice.
    pub is_finalized: bool,
    /// Invoice generated from this aggregation.
    pub invoice_id: Option<InvoiceId>,
    /// When the invoice locked it.
    pub finalized_at: Option<DateTime<Utc>>,
    /// Incremented on every write; used for compare-and-set updates.
    pub revision: u64,
    /// First calculation.
    pub created_at: DateTime<Utc>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
}

impl UsageAggregation {
    /// Create a fresh, unlocked aggregation at revision 1.
    #[must_use]
    pub fn new(key: AggregationKey, totals: PeriodTotals, now: DateTime<Utc>) -> Self {
        Self {
            id: AggregationId::generate(),
            workspace_id: key.workspace_id,
            period: key.period,
            billing_entity_id: key.billing_entity_id,
            traffic_total_gb: totals.traffic_total_gb,
            storage_avg_gb: totals.storage_avg_gb,
            compute_total_units: totals.compute_total_units,
            event_count: totals.event_count,
            is_finalized: false,
            invoice_id: None,
            finalized_at: None,
            revision: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// The key this aggregation is stored under.
    #[must_use]
    pub const fn key(&self) -> AggregationKey {
        AggregationKey::new(self.workspace_id, self.period, self.billing_entity_id)
    }

    /// Current totals.
    #[must_use]
    pub const fn totals(&self) -> PeriodTotals {
        PeriodTotals {
            traffic_total_gb: self.traffic_total_gb,
            storage_avg_gb: self.storage_avg_gb,
            compute_total_units: self.compute_total_units,
            event_count: self.event_count,
        }
    }

    /// Fail if an invoice has locked this aggregation.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::PeriodLocked` for finalized aggregations.
    pub fn ensure_unlocked(&self) -> crate::Result<()> {
        if self.is_finalized || self.invoice_id.is_some() {
            return Err(BillingError::PeriodLocked {
                workspace_id: self.workspace_id.to_string(),
                period: self.period.to_string(),
                invoice_id: self
                    .invoice_id
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string),
            });
        }
        Ok(())
    }

    /// Overwrite the totals of an unlocked aggregation.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::PeriodLocked` for finalized aggregations.
    pub fn apply_totals(&mut self, totals: PeriodTotals, now: DateTime<Utc>) -> crate::Result<()> {
        self.ensure_unlocked()?;
        self.traffic_total_gb = totals.traffic_total_gb;
        self.storage_avg_gb = totals.storage_avg_gb;
        self.compute_total_units = totals.compute_total_units;
        self.event_count = totals.event_count;
        self.revision += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Link an invoice and lock the aggregation.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::DuplicateInvoice` if an invoice is already linked.
    pub fn lock(&mut self, invoice_id: InvoiceId, now: DateTime<Utc>) -> crate::Result<()> {
        if let Some(existing) = &self.invoice_id {
            return Err(BillingError::DuplicateInvoice {
                workspace_id: self.workspace_id.to_string(),
                period: self.period.to_string(),
                invoice_id: existing.to_string(),
            });
        }
        self.invoice_id = Some(invoice_id);
        self.is_finalized = true;
        self.finalized_at = Some(now);
        self.revision += 1;
        self.updated_at = now;
        Ok(())
    }
}

/// One billing entity's share of a workspace.
///
/// Events keep the entity stamped at ingestion. Stored bytes are attributed
/// day by day: each day of the period bills whoever the directory resolves
/// at the start of that day, whatever the snapshot carried into it says.
#[derive(Debug, Clone, Copy)]
pub struct EntityScope<'a> {
    /// The entity whose usage is totalled.
    pub entity_id: BillingEntityId,
    /// Directory record of the workspace.
    pub workspace: &'a Workspace,
    /// Its organization, if any.
    pub organization: Option<&'a Organization>,
}

impl EntityScope<'_> {
    /// Whether storage held on `day` is billed to this scope's entity.
    #[must_use]
    pub fn bills_storage_on(&self, day: NaiveDate) -> bool {
        entity::resolve(self.workspace, self.organization, start_of_day(day)).id == self.entity_id
    }
}

/// Roll ledger events and storage snapshots up into period totals.
///
/// `events` must be in ledger order (timestamp, then event id); sums are taken
/// in that order so repeated runs over the same events are bit-identical.
/// `snapshots` may include days before the period: the latest one before the
/// period start carries into its first days. `scope = None` totals the whole
/// workspace.
#[must_use]
pub fn compute_totals(
    period: &BillingPeriod,
    events: &[UsageEvent],
    snapshots: &[StorageDailySnapshot],
    scope: Option<EntityScope<'_>>,
) -> PeriodTotals {
    let matches_entity =
        |entity: BillingEntityId| scope.map_or(true, |scope| scope.entity_id == entity);

    let mut traffic_bytes = 0.0;
    let mut compute_units = 0.0;
    let mut event_count = 0;

    for event in events
        .iter()
        .filter(|e| period.contains(e.timestamp) && matches_entity(e.billing_entity.id))
    {
        event_count += 1;
        match event.resource_type {
            ResourceType::Traffic => traffic_bytes += event.units,
            ResourceType::Compute => compute_units += event.billable_units(),
            // Storage is averaged from daily snapshots, not summed from events.
            ResourceType::Storage => {}
        }
    }

    PeriodTotals {
        traffic_total_gb: bytes_to_gb(traffic_bytes),
        storage_avg_gb: storage_average_gb(period, snapshots, scope),
        compute_total_units: compute_units,
        event_count,
    }
}

/// Time-weighted mean of stored GB over every day of the period.
///
/// Each project's snapshots form a step function: a day without a snapshot
/// holds the most recent earlier value, and days before the first snapshot
/// hold nothing. Daily values are summed across projects, then averaged over
/// the number of days in the period. With a scope, only the days billed to
/// its entity count towards the sum.
#[must_use]
pub fn storage_average_gb(
    period: &BillingPeriod,
    snapshots: &[StorageDailySnapshot],
    scope: Option<EntityScope<'_>>,
) -> f64 {
    let period_end = period.next_first_day();

    let mut series: BTreeMap<Option<ProjectId>, Vec<&StorageDailySnapshot>> = BTreeMap::new();
    for snapshot in snapshots.iter().filter(|s| s.date < period_end) {
        series.entry(snapshot.project_id).or_default().push(snapshot);
    }
    for points in series.values_mut() {
        points.sort_by_key(|s| s.date);
    }

    let days: Vec<NaiveDate> = period.iter_days().collect();
    if days.is_empty() {
        return 0.0;
    }
    let billed: Vec<bool> = days
        .iter()
        .map(|day| scope.map_or(true, |scope| scope.bills_storage_on(*day)))
        .collect();
    let mut daily = vec![0.0_f64; days.len()];

    for points in series.values() {
        let mut cursor = 0;
        let mut current: Option<&StorageDailySnapshot> = None;
        for ((slot, day), billed) in daily.iter_mut().zip(&days).zip(&billed) {
            while cursor < points.len() && points[cursor].date <= *day {
                current = Some(points[cursor]);
                cursor += 1;
            }
            if let (Some(snapshot), true) = (current, *billed) {
                *slot += snapshot.storage_gb;
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let day_count = days.len() as f64;
    daily.iter().sum::<f64>() / day_count
}
