//! Application state.

use std::sync::Arc;

use metering_core::Result;
use metering_store::Store;

use crate::authz::{Authorizer, HttpAuthorizer, StaticAuthorizer};
use crate::config::ServiceConfig;
use crate::engine::MeteringEngine;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The metering engine.
    pub engine: Arc<MeteringEngine>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state from configuration.
    ///
    /// The authorizer is the HTTP oracle when `authz_url` is set, otherwise
    /// every caller holding the service key is allowed.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self> {
        let authorizer: Arc<dyn Authorizer> = match config.authz_url.as_deref() {
            Some(url) => {
                tracing::info!(authz_url = %url, "Authorization oracle enabled");
                Arc::new(HttpAuthorizer::new(url)?)
            }
            None => {
                tracing::warn!("Authorization oracle not configured - all service callers allowed");
                Arc::new(StaticAuthorizer::allow_all())
            }
        };

        let notifier: Arc<dyn Notifier> = match WebhookNotifier::new() {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                tracing::error!(error = %e, "Failed to create webhook notifier, alerts will only be logged");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self::with_collaborators(store, authorizer, notifier, config))
    }

    /// Create application state with explicit collaborators.
    #[must_use]
    pub fn with_collaborators(
        store: Arc<dyn Store>,
        authorizer: Arc<dyn Authorizer>,
        notifier: Arc<dyn Notifier>,
        config: ServiceConfig,
    ) -> Self {
        let cooldown_secs = i64::try_from(config.alert_cooldown_seconds).unwrap_or(i64::MAX);
        let alert_cooldown = chrono::Duration::try_seconds(cooldown_secs)
            .unwrap_or_else(|| chrono::Duration::seconds(metering_core::DEFAULT_ALERT_COOLDOWN_SECS));

        let engine = MeteringEngine::new(
            store,
            authorizer,
            notifier,
            config.pricing.clone(),
            alert_cooldown,
        );

        Self {
            engine: Arc::new(engine),
            config,
        }
    }
}
