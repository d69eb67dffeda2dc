//! Common test utilities for metering integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::{TestResponse, TestServer};
use serde_json::{json, Value};

use metering_core::{OrganizationId, UserId, Workspace, WorkspaceId};
use metering_service::{
    create_router, AppState, LogNotifier, MeteringEngine, ServiceConfig, StaticAuthorizer,
};
use metering_store::MemoryStore;

/// Caller the harness authorizer always refuses.
pub const DENIED_CALLER: &str = "intruder";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The engine behind the server, for seeding state directly.
    pub engine: Arc<MeteringEngine>,
    /// A workspace owned by `owner_id`, seeded at startup.
    pub workspace_id: WorkspaceId,
    /// Owner of the seeded workspace.
    pub owner_id: UserId,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
    /// The admin API key for directory maintenance.
    pub admin_api_key: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh in-memory store.
    pub fn new() -> Self {
        let service_api_key = "test-service-key".to_string();
        let admin_api_key = "test-admin-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            service_api_key: Some(service_api_key.clone()),
            admin_api_key: Some(admin_api_key.clone()),
            ..ServiceConfig::default()
        };

        let state = AppState::with_collaborators(
            Arc::new(MemoryStore::new()),
            Arc::new(StaticAuthorizer::allow_all().deny_caller(DENIED_CALLER)),
            Arc::new(LogNotifier),
            config,
        );
        let engine = Arc::clone(&state.engine);

        let owner_id = UserId::generate();
        let workspace_id = WorkspaceId::generate();
        engine
            .put_workspace(&Workspace {
                id: workspace_id,
                owner_user_id: owner_id,
                organization_id: None,
                billing_suspended: false,
            })
            .expect("Failed to seed workspace");

        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            engine,
            workspace_id,
            owner_id,
            service_api_key,
            admin_api_key,
        }
    }

    /// Report one usage event for the seeded workspace.
    pub async fn report(&self, body: Value) -> TestResponse {
        self.server
            .post("/v1/usage")
            .add_header("x-api-key", &self.service_api_key)
            .json(&body)
            .await
    }

    /// Report traffic for the seeded workspace at a fixed instant.
    pub async fn report_traffic(&self, bytes: f64, timestamp: &str, key: &str) -> TestResponse {
        self.report(json!({
            "workspace_id": self.workspace_id.to_string(),
            "resource_type": "traffic",
            "units": bytes,
            "timestamp": timestamp,
            "idempotency_key": key,
            "source": "api"
        }))
        .await
    }

    /// Attach the seeded workspace to a new organization through the admin API.
    pub async fn join_organization(&self, billing_start_at: Option<&str>) -> OrganizationId {
        let organization_id = OrganizationId::generate();

        self.server
            .put(&format!("/v1/admin/organizations/{organization_id}"))
            .add_header("x-admin-key", &self.admin_api_key)
            .json(&json!({ "billing_start_at": billing_start_at }))
            .await
            .assert_status_ok();

        self.server
            .put(&format!("/v1/admin/workspaces/{}", self.workspace_id))
            .add_header("x-admin-key", &self.admin_api_key)
            .json(&json!({
                "owner_user_id": self.owner_id.to_string(),
                "organization_id": organization_id.to_string()
            }))
            .await
            .assert_status_ok();

        organization_id
    }

    /// Path prefix of the seeded workspace.
    pub fn workspace_path(&self, rest: &str) -> String {
        format!("/v1/workspaces/{}{rest}", self.workspace_id)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
