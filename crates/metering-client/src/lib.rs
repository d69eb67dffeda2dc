//! Metering Client SDK.
//!
//! This crate provides a client library for producers and billing jobs to
//! interact with the metering API.
//!
//! # Example
//!
//! ```no_run
//! use metering_client::{MeteringClient, UsageRequest};
//! use metering_core::{ResourceType, UsageSource, WorkspaceId};
//!
//! # async fn example() -> Result<(), metering_client::ClientError> {
//! let client = MeteringClient::new(
//!     "http://metering.billing-system.svc:8080",
//!     "your-service-api-key",
//! )?;
//!
//! // Report 1 GiB of egress traffic
//! let workspace_id: WorkspaceId = "0b7c4f7e-62a4-4a52-9d1e-0d2c5f3a9e11".parse()?;
//! let response = client
//!     .report_usage(
//!         UsageRequest::new(workspace_id, ResourceType::Traffic, 1_073_741_824.0, UsageSource::Api)
//!             .with_idempotency_key("req-7f3a"),
//!     )
//!     .await?;
//!
//! println!("Stored event {} (duplicate: {})", response.event.id, response.duplicate);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, MeteringClient};
pub use error::ClientError;
pub use types::*;
