//! Authentication extractors.
//!
//! - `ServiceAuth` - producers and billing callers, via the service API key
//! - `AdminAuth` - directory maintenance, via the admin API key
//!
//! Authentication only proves the caller holds a key. What the caller may do
//! on a workspace is decided later by the authorization oracle.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::state::AppState;

/// Caller name used when `X-Caller-Id` is absent.
const DEFAULT_CALLER: &str = "service";

/// Service authentication via API key.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// Caller identity passed to the authorization oracle (`X-Caller-Id`).
    pub caller: String,
}

impl ServiceAuth {
    /// Start a request context for this caller.
    #[must_use]
    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.caller.clone())
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = header(parts, "x-api-key").ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .service_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if api_key != expected_key {
            return Err(ApiError::Unauthorized);
        }

        let caller = header(parts, "x-caller-id")
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CALLER)
            .to_string();

        Ok(Self { caller })
    }
}

/// Admin authentication via the `X-Admin-Key` header.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let admin_key = header(parts, "x-admin-key").ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .admin_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if admin_key != expected_key {
            return Err(ApiError::Unauthorized);
        }

        let admin_id = header(parts, "x-admin-id")
            .unwrap_or("admin")
            .to_string();

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(Self { admin_id })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}
