//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{aggregations, alerts, directory, export, health, invoices, snapshots, usage};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for usage endpoints.
/// Producers report at high volume; this keeps them from starving billing calls.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Usage (Service API Key auth, rate-limited)
/// - `POST /v1/usage` - Report usage event
/// - `POST /v1/usage/batch` - Report multiple usage events
///
/// ## Billing (Service API Key auth)
/// - `PUT /v1/workspaces/:ws/storage-snapshots` - Record daily storage
/// - `POST|GET /v1/workspaces/:ws/aggregations/:period` - Calculate / read
/// - `POST|GET /v1/workspaces/:ws/invoices` - Generate / list
/// - `GET /v1/invoices/:id`, `POST /v1/invoices/:id/finalize`, `POST /v1/invoices/:id/pay`
/// - `GET /v1/workspaces/:ws/events/export` - CSV or JSON ledger export
/// - `POST|GET /v1/workspaces/:ws/alerts`, `GET|PATCH|DELETE /v1/workspaces/:ws/alerts/:id`
/// - `POST /v1/workspaces/:ws/alerts/evaluate`
///
/// ## Directory (Admin API Key auth)
/// - `PUT /v1/admin/workspaces/:id`
/// - `PUT /v1/admin/organizations/:id`
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let usage_routes = Router::new()
        .route("/", post(usage::report_usage))
        .route("/batch", post(usage::report_usage_batch))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Storage and aggregation
        .route(
            "/workspaces/:workspace_id/storage-snapshots",
            put(snapshots::put_snapshot),
        )
        .route(
            "/workspaces/:workspace_id/aggregations/:period",
            post(aggregations::calculate_aggregation).get(aggregations::get_aggregation),
        )
        // Invoices
        .route(
            "/workspaces/:workspace_id/invoices",
            post(invoices::generate_invoice).get(invoices::list_invoices),
        )
        .route("/invoices/:invoice_id", get(invoices::get_invoice))
        .route("/invoices/:invoice_id/finalize", post(invoices::finalize_invoice))
        .route("/invoices/:invoice_id/pay", post(invoices::pay_invoice))
        // Export
        .route(
            "/workspaces/:workspace_id/events/export",
            get(export::export_events),
        )
        // Alerts
        .route(
            "/workspaces/:workspace_id/alerts",
            post(alerts::create_alert).get(alerts::list_alerts),
        )
        .route(
            "/workspaces/:workspace_id/alerts/evaluate",
            post(alerts::evaluate_alerts),
        )
        .route(
            "/workspaces/:workspace_id/alerts/:alert_id",
            get(alerts::get_alert)
                .patch(alerts::update_alert)
                .delete(alerts::delete_alert),
        )
        // Directory
        .route("/admin/workspaces/:workspace_id", put(directory::put_workspace))
        .route(
            "/admin/organizations/:organization_id",
            put(directory::put_organization),
        )
        // Usage routes (with their own concurrency limit)
        .nest("/usage", usage_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
