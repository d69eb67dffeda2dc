//! Metering HTTP API Service.
//!
//! This crate provides the HTTP API for usage metering and billing
//! aggregation, including:
//!
//! - Usage event ingestion with idempotency
//! - Daily storage snapshots
//! - Monthly aggregation and invoice generation
//! - Invoice lifecycle (finalize, pay)
//! - Usage alerts and ledger export
//!
//! # Authentication
//!
//! Callers present a shared **service API key** (`x-api-key`); directory
//! maintenance uses the **admin API key** (`x-admin-key`). Per-workspace
//! permission is then decided by an [`Authorizer`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers stay async for a uniform router

pub mod auth;
pub mod authz;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod routes;
pub mod state;

pub use authz::{Action, Authorizer, HttpAuthorizer, StaticAuthorizer};
pub use config::ServiceConfig;
pub use context::RequestContext;
pub use engine::MeteringEngine;
pub use error::ApiError;
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use routes::create_router;
pub use state::AppState;
