//! Invoice generator and invoice lifecycle.

use chrono::{DateTime, Utc};

use metering_core::{
    AggregationKey, BillingEntityId, BillingError, BillingPeriod, Invoice, InvoiceId,
    InvoiceStatus, Result, WorkspaceId,
};
use metering_store::StoreError;

use super::{MeteringEngine, MAX_WRITE_ATTEMPTS};
use crate::authz::Action;
use crate::context::RequestContext;

impl MeteringEngine {
    /// Price the stored aggregation and lock it with a draft invoice.
    ///
    /// The invoice and the lock are written together, checked against the
    /// revision the invoice was priced from. If the aggregation was
    /// recomputed in between, the invoice is priced again from the new
    /// totals.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the aggregation was never calculated.
    /// - `DuplicateInvoice` if it, or an aggregation of the same period whose
    ///   scope overlaps it, already has an invoice, including when a
    ///   concurrent call won. The whole-workspace scope overlaps every
    ///   entity scope; distinct entities don't overlap.
    pub async fn generate_invoice(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        period: BillingPeriod,
        billing_entity_id: Option<BillingEntityId>,
    ) -> Result<Invoice> {
        self.authorize(ctx, &workspace_id, Action::GenerateInvoice)
            .await?;

        let key = AggregationKey::new(workspace_id, period, billing_entity_id);

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let aggregation = self
                .store
                .get_aggregation(&key)?
                .ok_or_else(|| BillingError::not_found("aggregation", key))?;

            let now = Utc::now();
            let invoice = Invoice::draft(&aggregation, &self.pricing.rates, now)?;

            let expected = aggregation.revision;
            let mut locked = aggregation;
            locked.lock(invoice.invoice_id.clone(), now)?;

            match self.store.create_invoice(&invoice, &locked, expected) {
                Ok(()) => {
                    tracing::info!(
                        invoice_id = %invoice.invoice_id,
                        aggregation = %key,
                        total_cost = %invoice.total_cost,
                        "Invoice generated"
                    );
                    return Ok(invoice);
                }
                Err(StoreError::RevisionConflict { .. }) => {
                    tracing::debug!(aggregation = %key, attempt, "Aggregation changed while invoicing, retrying");
                }
                Err(StoreError::DuplicateInvoice { invoice_id }) => {
                    tracing::warn!(
                        aggregation = %key,
                        existing_invoice_id = %invoice_id,
                        "Concurrent invoice generation lost"
                    );
                    return Err(BillingError::DuplicateInvoice {
                        workspace_id: workspace_id.to_string(),
                        period: period.to_string(),
                        invoice_id,
                    });
                }
                Err(StoreError::NotFound) => {
                    return Err(BillingError::not_found("aggregation", key));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(BillingError::Conflict(format!(
            "aggregation {key} kept changing after {MAX_WRITE_ATTEMPTS} attempts"
        )))
    }

    /// Move a draft invoice to `finalized`.
    ///
    /// # Errors
    ///
    /// `NotFound` (also for callers denied on the invoice's workspace), or
    /// `StateTransition` if the invoice is not a draft.
    pub async fn finalize_invoice(
        &self,
        ctx: &RequestContext,
        invoice_id: &InvoiceId,
    ) -> Result<Invoice> {
        self.transition(ctx, invoice_id, Action::FinalizeInvoice, Invoice::finalize)
            .await
    }

    /// Move a finalized invoice to `paid`.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `StateTransition` if the invoice is not finalized.
    pub async fn pay_invoice(&self, ctx: &RequestContext, invoice_id: &InvoiceId) -> Result<Invoice> {
        self.transition(ctx, invoice_id, Action::PayInvoice, Invoice::pay)
            .await
    }

    /// Get one invoice.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the invoice doesn't exist or the caller may not
    /// read its workspace's invoices.
    pub async fn get_invoice(&self, ctx: &RequestContext, invoice_id: &InvoiceId) -> Result<Invoice> {
        self.authorized_invoice(ctx, invoice_id, Action::ReadInvoices)
            .await
    }

    /// Invoices of a workspace, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if authorization or the store read fails.
    pub async fn list_invoices(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<Invoice>> {
        self.authorize(ctx, &workspace_id, Action::ReadInvoices)
            .await?;
        Ok(self.store.list_invoices(&workspace_id)?)
    }

    fn load_invoice(&self, invoice_id: &InvoiceId) -> Result<Invoice> {
        self.store
            .get_invoice(invoice_id)?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))
    }

    /// Invoice ids don't name a workspace, so a denied caller gets the same
    /// `NotFound` as for an unknown id.
    async fn authorized_invoice(
        &self,
        ctx: &RequestContext,
        invoice_id: &InvoiceId,
        action: Action,
    ) -> Result<Invoice> {
        let invoice = self.load_invoice(invoice_id)?;
        match self.authorize(ctx, &invoice.workspace_id, action).await {
            Ok(()) => Ok(invoice),
            Err(BillingError::Unauthorized(_)) => {
                Err(BillingError::not_found("invoice", invoice_id))
            }
            Err(e) => Err(e),
        }
    }

    /// Read, apply the transition, and compare-and-set on the status read.
    async fn transition(
        &self,
        ctx: &RequestContext,
        invoice_id: &InvoiceId,
        action: Action,
        apply: fn(&mut Invoice, DateTime<Utc>) -> Result<()>,
    ) -> Result<Invoice> {
        let mut invoice = self.authorized_invoice(ctx, invoice_id, action).await?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            if attempt > 1 {
                invoice = self.load_invoice(invoice_id)?;
            }

            let expected: InvoiceStatus = invoice.status;
            apply(&mut invoice, Utc::now())?;

            match self.store.update_invoice(&invoice, expected) {
                Ok(()) => {
                    tracing::info!(
                        invoice_id = %invoice.invoice_id,
                        from = %expected,
                        to = %invoice.status,
                        "Invoice status changed"
                    );
                    return Ok(invoice);
                }
                Err(StoreError::StatusConflict { .. }) => {
                    tracing::debug!(invoice_id = %invoice_id, attempt, "Invoice status moved, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(BillingError::Conflict(format!(
            "invoice {invoice_id} kept changing after {MAX_WRITE_ATTEMPTS} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::StaticAuthorizer;
    use crate::engine::testing::{ctx, fixture, Fixture};
    use chrono::TimeZone;
    use metering_core::{NewUsageEvent, ResourceType, UsageSource};
    use metering_store::{AggregationRepository, InvoiceRepository};
    use rust_decimal::Decimal;

    const GIB: f64 = 1_073_741_824.0;

    fn march() -> BillingPeriod {
        "2024-03".parse().unwrap()
    }

    async fn invoiced(f: &Fixture) -> Invoice {
        let ws = f.workspace.id;
        f.engine
            .record_usage(
                &ctx(),
                NewUsageEvent {
                    workspace_id: ws,
                    project_id: None,
                    resource_type: ResourceType::Traffic,
                    units: 10.0 * GIB,
                    base_units: None,
                    job_type: None,
                    idempotency_key: Some("t".into()),
                    timestamp: Some(Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()),
                    source: UsageSource::Api,
                    metadata: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();
        f.engine
            .calculate_aggregation(&ctx(), ws, march(), None)
            .await
            .unwrap();
        f.engine
            .generate_invoice(&ctx(), ws, march(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn invoice_locks_aggregation_and_prices_usage() {
        let f = fixture();
        let invoice = invoiced(&f).await;

        assert_eq!(invoice.status, InvoiceStatus::Draft);
        // 10 GB at the default 0.09 per GB.
        assert_eq!(invoice.traffic_cost, Decimal::new(90, 2));
        assert_eq!(invoice.total_cost, invoice.recompute_cost().total);

        let agg = f
            .store
            .get_aggregation(&AggregationKey::new(f.workspace.id, march(), None))
            .unwrap()
            .unwrap();
        assert!(agg.is_finalized);
        assert_eq!(agg.invoice_id.as_ref(), Some(&invoice.invoice_id));
        assert_eq!(agg.revision, invoice.aggregation_revision + 1);
        assert_eq!(agg.id, invoice.aggregation_snapshot_id);
    }

    #[tokio::test]
    async fn second_invoice_is_a_duplicate() {
        let f = fixture();
        let first = invoiced(&f).await;

        let err = f
            .engine
            .generate_invoice(&ctx(), f.workspace.id, march(), None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, BillingError::DuplicateInvoice { ref invoice_id, .. } if *invoice_id == first.invoice_id.to_string())
        );
        assert_eq!(f.store.list_invoices(&f.workspace.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invoice_without_aggregation_is_not_found() {
        let f = fixture();
        let err = f
            .engine
            .generate_invoice(&ctx(), f.workspace.id, march(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn lifecycle_draft_finalized_paid() {
        let f = fixture();
        let invoice = invoiced(&f).await;

        let finalized = f
            .engine
            .finalize_invoice(&ctx(), &invoice.invoice_id)
            .await
            .unwrap();
        assert_eq!(finalized.status, InvoiceStatus::Finalized);
        assert!(finalized.finalized_at.is_some());

        let paid = f.engine.pay_invoice(&ctx(), &invoice.invoice_id).await.unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);

        let err = f
            .engine
            .finalize_invoice(&ctx(), &invoice.invoice_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::StateTransition { action: "finalize", .. }));

        let stored = f.engine.get_invoice(&ctx(), &invoice.invoice_id).await.unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn draft_cannot_be_paid() {
        let f = fixture();
        let invoice = invoiced(&f).await;

        let err = f
            .engine
            .pay_invoice(&ctx(), &invoice.invoice_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::StateTransition { action: "pay", .. }));

        let stored = f.store.get_invoice(&invoice.invoice_id).unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Draft);
    }

    #[tokio::test]
    async fn finalize_twice_fails() {
        let f = fixture();
        let invoice = invoiced(&f).await;
        f.engine
            .finalize_invoice(&ctx(), &invoice.invoice_id)
            .await
            .unwrap();
        assert!(f
            .engine
            .finalize_invoice(&ctx(), &invoice.invoice_id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn reading_another_callers_invoice_is_denied() {
        let f = fixture();
        let invoice = invoiced(&f).await;

        let denied = crate::engine::MeteringEngine::new(
            f.store.clone(),
            std::sync::Arc::new(StaticAuthorizer::allow_all().deny_caller("test")),
            std::sync::Arc::new(crate::notify::LogNotifier),
            metering_core::PricingConfig::default(),
            chrono::Duration::hours(24),
        );
        let err = denied
            .get_invoice(&ctx(), &invoice.invoice_id)
            .await
            .unwrap_err();
        let missing = denied
            .get_invoice(&ctx(), &InvoiceId::generate(&march()))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound { entity: "invoice", .. }));
        assert!(matches!(missing, BillingError::NotFound { entity: "invoice", .. }));

        let err = denied
            .finalize_invoice(&ctx(), &invoice.invoice_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound { entity: "invoice", .. }));
        let stored = f.store.get_invoice(&invoice.invoice_id).unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Draft);
    }

    #[tokio::test]
    async fn same_period_is_billed_once_across_scopes() {
        let f = fixture();
        let ws = f.workspace.id;
        let owner = Some(f.workspace.owner_user_id.into());
        // Both scopes computed before either is invoiced.
        f.engine
            .calculate_aggregation(&ctx(), ws, march(), owner)
            .await
            .unwrap();
        let first = invoiced(&f).await;

        let err = f
            .engine
            .generate_invoice(&ctx(), ws, march(), owner)
            .await
            .unwrap_err();
        assert!(
            matches!(err, BillingError::DuplicateInvoice { ref invoice_id, .. } if *invoice_id == first.invoice_id.to_string())
        );
        assert_eq!(f.store.list_invoices(&ws).unwrap(), vec![first]);
        let owner_agg = f
            .store
            .get_aggregation(&AggregationKey::new(ws, march(), owner))
            .unwrap()
            .unwrap();
        assert!(!owner_agg.is_finalized);
    }

    #[tokio::test]
    async fn owner_and_organization_shares_are_invoiced_separately() {
        let mut f = fixture();
        let org = f.join_organization(Some(Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap()));
        let ws = f.workspace.id;
        let shares = [Some(f.workspace.owner_user_id.into()), Some(org.id.into())];

        for share in shares {
            f.engine
                .calculate_aggregation(&ctx(), ws, march(), share)
                .await
                .unwrap();
            f.engine
                .generate_invoice(&ctx(), ws, march(), share)
                .await
                .unwrap();
        }
        assert_eq!(f.store.list_invoices(&ws).unwrap().len(), 2);

        let err = f
            .engine
            .calculate_aggregation(&ctx(), ws, march(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::PeriodLocked { .. }));
    }
}
