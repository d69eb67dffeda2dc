//! Liveness endpoint.

use axum::Json;
use serde::Serialize;

/// Storage backend compiled into this binary.
#[cfg(feature = "rocksdb-backend")]
const STORAGE_BACKEND: &str = "rocksdb";
#[cfg(not(feature = "rocksdb-backend"))]
const STORAGE_BACKEND: &str = "memory";

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// `rocksdb` or `memory`.
    pub storage: &'static str,
}

/// Report liveness. Needs no authentication.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "metering",
        version: env!("CARGO_PKG_VERSION"),
        storage: STORAGE_BACKEND,
    })
}
