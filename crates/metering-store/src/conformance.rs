//! Behavior every backend must share. Each backend's test module calls these.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use metering_core::{
    AggregationKey, AlertDefinition, AlertType, BillingEntity, BillingEntityId, BillingEntityType,
    BillingPeriod, BillingRates, EventId, Invoice, InvoiceId, InvoiceStatus, NewAlert,
    Organization, OrganizationId, PeriodTotals, ResourceType, StorageDailySnapshot,
    UsageAggregation, UsageEvent, UsageSource, UserId, Workspace, WorkspaceId,
};

use crate::{AppendOutcome, Store, StoreError};

fn payer() -> BillingEntity {
    BillingEntity {
        id: UserId::generate().into(),
        entity_type: BillingEntityType::User,
    }
}

pub fn event(workspace_id: WorkspaceId, key: &str, ts: DateTime<Utc>) -> UsageEvent {
    UsageEvent {
        id: EventId::generate(),
        workspace_id,
        project_id: None,
        resource_type: ResourceType::Traffic,
        units: 1024.0,
        base_units: None,
        weighted_units: None,
        job_type: None,
        idempotency_key: key.to_string(),
        timestamp: ts,
        recorded_at: Utc::now(),
        source: UsageSource::Api,
        billing_entity: payer(),
        metadata: serde_json::json!({ "route": "/v1/things" }),
    }
}

fn aggregation(workspace_id: WorkspaceId) -> UsageAggregation {
    let period: BillingPeriod = "2024-03".parse().unwrap();
    let totals = PeriodTotals {
        traffic_total_gb: 2.0,
        storage_avg_gb: 1.5,
        compute_total_units: 10.0,
        event_count: 2,
    };
    UsageAggregation::new(AggregationKey::new(workspace_id, period, None), totals, Utc::now())
}

pub fn idempotent_append<S: Store>(store: &S) {
    let ws = WorkspaceId::generate();
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let first = event(ws, "op-1", ts);

    let outcome = store.append_event(&first).unwrap();
    assert!(outcome.is_created());

    // Same key, different content: the stored event wins.
    let mut retry = event(ws, "op-1", ts + Duration::hours(1));
    retry.units = 99.0;
    match store.append_event(&retry).unwrap() {
        AppendOutcome::Existing(stored) => assert_eq!(stored, first),
        AppendOutcome::Created(_) => panic!("duplicate key appended twice"),
    }

    // Keys are scoped per workspace.
    let other = event(WorkspaceId::generate(), "op-1", ts);
    assert!(store.append_event(&other).unwrap().is_created());

    let found = store.find_event_by_key(&ws, "op-1").unwrap().unwrap();
    assert_eq!(found.id, first.id);
    assert!(store.find_event_by_key(&ws, "op-2").unwrap().is_none());

    let all = store
        .list_events(&ws, ts - Duration::days(1), ts + Duration::days(1))
        .unwrap();
    assert_eq!(all.len(), 1);
}

pub fn concurrent_append_writes_once<S: Store + 'static>(store: Arc<S>) {
    let ws = WorkspaceId::generate();
    let ts = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.append_event(&event(ws, "retry", ts)).unwrap())
        })
        .collect();
    let created = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(AppendOutcome::is_created)
        .count();

    assert_eq!(created, 1);
    let events = store
        .list_events(&ws, ts, ts + Duration::seconds(1))
        .unwrap();
    assert_eq!(events.len(), 1);
}

pub fn events_listed_in_ledger_order<S: Store>(store: &S) {
    let ws = WorkspaceId::generate();
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();

    // Arrive out of order.
    for (key, ts) in [
        ("c", start + Duration::days(10)),
        ("a", start),
        ("d", end),
        ("b", start + Duration::days(2)),
        ("z", start - Duration::nanoseconds(1)),
    ] {
        store.append_event(&event(ws, key, ts)).unwrap();
    }

    let keys: Vec<_> = store
        .list_events(&ws, start, end)
        .unwrap()
        .into_iter()
        .map(|e| e.idempotency_key)
        .collect();
    assert_eq!(keys, ["a", "b", "c"]);

    assert!(store.list_events(&ws, end, start).unwrap().is_empty());
}

pub fn snapshots_replace_and_list<S: Store>(store: &S) {
    let ws = WorkspaceId::generate();
    let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
    let snapshot = |date, gb| StorageDailySnapshot {
        workspace_id: ws,
        project_id: None,
        storage_gb: gb,
        date,
        billing_entity: payer(),
        recorded_at: Utc::now(),
    };

    store.put_snapshot(&snapshot(day(1), 1.0)).unwrap();
    store.put_snapshot(&snapshot(day(5), 5.0)).unwrap();
    store.put_snapshot(&snapshot(day(5), 6.0)).unwrap();
    store.put_snapshot(&snapshot(day(20), 20.0)).unwrap();

    let listed = store.list_snapshots(&ws, day(20)).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].date, day(1));
    assert!((listed[1].storage_gb - 6.0).abs() < f64::EPSILON);

    assert!(store
        .list_snapshots(&WorkspaceId::generate(), day(31))
        .unwrap()
        .is_empty());
}

pub fn aggregation_compare_and_set<S: Store>(store: &S) {
    let agg = aggregation(WorkspaceId::generate());
    store.insert_aggregation(&agg).unwrap();
    assert!(matches!(
        store.insert_aggregation(&agg),
        Err(StoreError::AlreadyExists)
    ));

    let mut next = agg.clone();
    next.apply_totals(PeriodTotals { event_count: 3, ..agg.totals() }, Utc::now())
        .unwrap();
    store.update_aggregation(&next, agg.revision).unwrap();

    // A writer still holding the old revision loses.
    let err = store.update_aggregation(&next, agg.revision).unwrap_err();
    assert!(matches!(
        err,
        StoreError::RevisionConflict { expected: 1, actual: 2 }
    ));

    let stored = store.get_aggregation(&agg.key()).unwrap().unwrap();
    assert_eq!(stored.revision, 2);
    assert_eq!(stored.event_count, 3);

    let missing = aggregation(WorkspaceId::generate());
    assert!(matches!(
        store.update_aggregation(&missing, 1),
        Err(StoreError::NotFound)
    ));
}

fn draft_and_locked(agg: &UsageAggregation) -> (Invoice, UsageAggregation) {
    let invoice = Invoice::draft(agg, &BillingRates::default(), Utc::now()).unwrap();
    let mut locked = agg.clone();
    locked.lock(invoice.invoice_id.clone(), Utc::now()).unwrap();
    (invoice, locked)
}

pub fn invoice_creation_locks_aggregation<S: Store>(store: &S) {
    let ws = WorkspaceId::generate();
    let agg = aggregation(ws);
    store.insert_aggregation(&agg).unwrap();

    let (invoice, locked) = draft_and_locked(&agg);
    store.create_invoice(&invoice, &locked, agg.revision).unwrap();

    let stored_agg = store.get_aggregation(&agg.key()).unwrap().unwrap();
    assert!(stored_agg.is_finalized);
    assert_eq!(stored_agg.invoice_id.as_ref(), Some(&invoice.invoice_id));
    assert_eq!(store.get_invoice(&invoice.invoice_id).unwrap(), Some(invoice.clone()));
    assert_eq!(store.list_invoices(&ws).unwrap(), vec![invoice.clone()]);

    // Second attempt against the same aggregation.
    let (again, relocked) = draft_and_locked(&agg);
    let err = store.create_invoice(&again, &relocked, stored_agg.revision).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateInvoice { ref invoice_id } if *invoice_id == invoice.invoice_id.to_string()));
    assert!(store.get_invoice(&again.invoice_id).unwrap().is_none());

    // Stale revision on an unlocked aggregation.
    let fresh = aggregation(WorkspaceId::generate());
    store.insert_aggregation(&fresh).unwrap();
    let mut bumped = fresh.clone();
    bumped.apply_totals(fresh.totals(), Utc::now()).unwrap();
    store.update_aggregation(&bumped, fresh.revision).unwrap();

    let (stale, stale_locked) = draft_and_locked(&fresh);
    let err = store.create_invoice(&stale, &stale_locked, fresh.revision).unwrap_err();
    assert!(matches!(err, StoreError::RevisionConflict { .. }));
    assert!(store.get_invoice(&stale.invoice_id).unwrap().is_none());
    assert!(!store.get_aggregation(&fresh.key()).unwrap().unwrap().is_finalized);
}

pub fn overlapping_scopes_share_one_invoice<S: Store>(store: &S) {
    let ws = WorkspaceId::generate();
    let whole = aggregation(ws);
    let owner: BillingEntityId = UserId::generate().into();
    let org: BillingEntityId = OrganizationId::generate().into();
    let scoped = |entity| {
        UsageAggregation::new(
            AggregationKey::new(ws, whole.period, Some(entity)),
            whole.totals(),
            Utc::now(),
        )
    };
    let owner_agg = scoped(owner);
    let org_agg = scoped(org);
    for agg in [&whole, &owner_agg, &org_agg] {
        store.insert_aggregation(agg).unwrap();
    }
    assert_eq!(store.list_period_aggregations(&ws, &whole.period).unwrap().len(), 3);

    let (first, locked) = draft_and_locked(&whole);
    store.create_invoice(&first, &locked, whole.revision).unwrap();

    // The same usage seen through an entity scope.
    let (second, owner_locked) = draft_and_locked(&owner_agg);
    let err = store
        .create_invoice(&second, &owner_locked, owner_agg.revision)
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateInvoice { ref invoice_id } if *invoice_id == first.invoice_id.to_string()));
    assert!(store.get_invoice(&second.invoice_id).unwrap().is_none());
    assert!(!store.get_aggregation(&owner_agg.key()).unwrap().unwrap().is_finalized);
    assert_eq!(store.list_invoices(&ws).unwrap(), vec![first]);

    // Two entity scopes bill disjoint usage and may both be invoiced.
    let other_ws = WorkspaceId::generate();
    let split = |entity| {
        UsageAggregation::new(
            AggregationKey::new(other_ws, whole.period, Some(entity)),
            whole.totals(),
            Utc::now(),
        )
    };
    let (user_part, org_part) = (split(owner), split(org));
    for agg in [&user_part, &org_part] {
        store.insert_aggregation(agg).unwrap();
        let (invoice, locked) = draft_and_locked(agg);
        store.create_invoice(&invoice, &locked, agg.revision).unwrap();
    }
    let all = AggregationKey::new(other_ws, whole.period, None);
    let all_agg = UsageAggregation::new(all, whole.totals(), Utc::now());
    store.insert_aggregation(&all_agg).unwrap();
    let (third, all_locked) = draft_and_locked(&all_agg);
    assert!(matches!(
        store.create_invoice(&third, &all_locked, all_agg.revision),
        Err(StoreError::DuplicateInvoice { .. })
    ));
    assert_eq!(store.list_invoices(&other_ws).unwrap().len(), 2);
}

pub fn concurrent_invoice_creation_has_one_winner<S: Store + 'static>(store: Arc<S>) {
    let agg = aggregation(WorkspaceId::generate());
    store.insert_aggregation(&agg).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let agg = agg.clone();
            thread::spawn(move || {
                let (invoice, locked) = draft_and_locked(&agg);
                store.create_invoice(&invoice, &locked, agg.revision)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, StoreError::DuplicateInvoice { .. })));
    assert_eq!(store.list_invoices(&agg.workspace_id).unwrap().len(), 1);
}

pub fn invoice_status_compare_and_set<S: Store>(store: &S) {
    let agg = aggregation(WorkspaceId::generate());
    store.insert_aggregation(&agg).unwrap();
    let (invoice, locked) = draft_and_locked(&agg);
    store.create_invoice(&invoice, &locked, agg.revision).unwrap();

    let mut finalized = invoice.clone();
    finalized.finalize(Utc::now()).unwrap();
    store.update_invoice(&finalized, InvoiceStatus::Draft).unwrap();

    // A concurrent finalize that read `draft` loses.
    let err = store.update_invoice(&finalized, InvoiceStatus::Draft).unwrap_err();
    assert!(matches!(err, StoreError::StatusConflict { .. }));

    let stored = store.get_invoice(&invoice.invoice_id).unwrap().unwrap();
    assert_eq!(stored.status, InvoiceStatus::Finalized);

    let unknown = InvoiceId::generate(&agg.period);
    let mut ghost = finalized.clone();
    ghost.invoice_id = unknown;
    assert!(matches!(
        store.update_invoice(&ghost, InvoiceStatus::Finalized),
        Err(StoreError::NotFound)
    ));
}

pub fn alert_crud<S: Store>(store: &S) {
    let ws = WorkspaceId::generate();
    let make = |threshold| -> AlertDefinition {
        NewAlert {
            resource_type: ResourceType::Traffic,
            threshold,
            alert_type: AlertType::Webhook,
            is_enabled: true,
            webhook_url: Some("https://hooks.example.com/usage".to_string()),
            recipient: None,
        }
        .into_definition(ws, Utc::now())
        .unwrap()
    };

    let first = make(1.0);
    let second = make(2.0);
    store.put_alert(&first).unwrap();
    store.put_alert(&second).unwrap();
    store.put_alert(&make(3.0)).unwrap();

    let mut updated = first.clone();
    updated.is_enabled = false;
    store.put_alert(&updated).unwrap();
    assert_eq!(store.get_alert(&ws, &first.id).unwrap(), Some(updated));

    store.delete_alert(&ws, &second.id).unwrap();
    assert!(matches!(
        store.delete_alert(&ws, &second.id),
        Err(StoreError::NotFound)
    ));
    assert_eq!(store.list_alerts(&ws).unwrap().len(), 2);

    // Alerts are scoped to their workspace.
    assert!(store
        .get_alert(&WorkspaceId::generate(), &first.id)
        .unwrap()
        .is_none());
}

pub fn alert_trigger_keeps_concurrent_edit<S: Store>(store: &S) {
    let ws = WorkspaceId::generate();
    let created = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let alert = NewAlert {
        resource_type: ResourceType::Traffic,
        threshold: 10.0,
        alert_type: AlertType::Webhook,
        is_enabled: true,
        webhook_url: Some("https://hooks.example.com/old".to_string()),
        recipient: None,
    }
    .into_definition(ws, created)
    .unwrap();
    store.put_alert(&alert).unwrap();

    // An edit lands after the evaluator read the alert.
    let mut edited = alert.clone();
    edited.threshold = 50.0;
    edited.webhook_url = Some("https://hooks.example.com/new".to_string());
    store.put_alert(&edited).unwrap();

    let fired_at = created + Duration::hours(2);
    store.record_alert_triggered(&ws, &alert.id, fired_at).unwrap();

    let stored = store.get_alert(&ws, &alert.id).unwrap().unwrap();
    assert_eq!(stored.last_triggered_at, Some(fired_at));
    assert!((stored.threshold - 50.0).abs() < f64::EPSILON);
    assert_eq!(stored.webhook_url.as_deref(), Some("https://hooks.example.com/new"));

    store.delete_alert(&ws, &alert.id).unwrap();
    assert!(matches!(
        store.record_alert_triggered(&ws, &alert.id, fired_at),
        Err(StoreError::NotFound)
    ));
    assert!(store.get_alert(&ws, &alert.id).unwrap().is_none());
}

pub fn directory_roundtrip<S: Store>(store: &S) {
    let org = Organization {
        id: OrganizationId::generate(),
        billing_start_at: Some(Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()),
        billing_suspended: false,
    };
    let workspace = Workspace {
        id: WorkspaceId::generate(),
        owner_user_id: UserId::generate(),
        organization_id: Some(org.id),
        billing_suspended: false,
    };

    store.put_organization(&org).unwrap();
    store.put_workspace(&workspace).unwrap();

    assert_eq!(store.get_workspace(&workspace.id).unwrap(), Some(workspace.clone()));
    assert_eq!(store.get_organization(&org.id).unwrap(), Some(org));
    assert!(store.get_workspace(&WorkspaceId::generate()).unwrap().is_none());

    let suspended = Workspace {
        billing_suspended: true,
        ..workspace
    };
    store.put_workspace(&suspended).unwrap();
    assert!(store.get_workspace(&suspended.id).unwrap().unwrap().billing_suspended);
}
