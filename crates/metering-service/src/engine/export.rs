//! Ledger export.

use chrono::{DateTime, Utc};

use metering_core::export;
use metering_core::{ExportFilter, ExportFormat, Result, WorkspaceId};

use super::MeteringEngine;
use crate::authz::Action;
use crate::context::RequestContext;

impl MeteringEngine {
    /// Encode the workspace's ledger events that pass `filter`, in ledger
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error if authorization, the store read, or encoding fails.
    pub async fn export_events(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        filter: &ExportFilter,
        format: ExportFormat,
    ) -> Result<Vec<u8>> {
        self.authorize(ctx, &workspace_id, Action::ExportEvents)
            .await?;

        let from = filter.from.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let to = filter.to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        let events: Vec<_> = self
            .store
            .list_events(&workspace_id, from, to)?
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect();

        tracing::info!(
            caller = %ctx.caller(),
            workspace_id = %workspace_id,
            format = format.extension(),
            events = events.len(),
            "Events exported"
        );
        export::encode(&events, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{ctx, fixture};
    use chrono::TimeZone;
    use metering_core::{NewUsageEvent, ResourceType, UsageSource};

    #[tokio::test]
    async fn csv_export_filters_by_resource() {
        let f = fixture();
        let ws = f.workspace.id;
        for (key, resource_type) in [("t", ResourceType::Traffic), ("c", ResourceType::Compute)] {
            f.engine
                .record_usage(
                    &ctx(),
                    NewUsageEvent {
                        workspace_id: ws,
                        project_id: None,
                        resource_type,
                        units: 5.0,
                        base_units: None,
                        job_type: None,
                        idempotency_key: Some(key.into()),
                        timestamp: Some(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()),
                        source: UsageSource::Job,
                        metadata: serde_json::json!({ "k": key }),
                    },
                )
                .await
                .unwrap();
        }

        let filter = ExportFilter {
            resource_type: Some(ResourceType::Compute),
            ..ExportFilter::default()
        };
        let body = f
            .engine
            .export_events(&ctx(), ws, &filter, ExportFormat::Csv)
            .await
            .unwrap();
        let text = String::from_utf8(body).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(
            lines[0],
            "id,workspaceId,projectId,resourceType,units,source,timestamp,metadata"
        );
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains(",compute,"));
    }
}
