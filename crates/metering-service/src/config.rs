//! Service configuration.

use std::path::Path;

use metering_core::{PricingConfig, DEFAULT_ALERT_COOLDOWN_SECS};

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/metering").
    pub data_dir: String,

    /// Service API key for producer and billing requests.
    pub service_api_key: Option<String>,

    /// Admin API key for directory updates.
    pub admin_api_key: Option<String>,

    /// Authorization oracle endpoint. When unset, every caller holding the
    /// service key is allowed.
    pub authz_url: Option<String>,

    /// Rates and compute weights.
    pub pricing: PricingConfig,

    /// Minimum seconds between two notifications of the same alert.
    pub alert_cooldown_seconds: u64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The pricing file could not be read.
    #[error("cannot read pricing file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The pricing file is not valid JSON for a pricing configuration.
    #[error("invalid pricing file {path}: {source}")]
    Parse {
        /// File path.
        path: String,
        /// Underlying error.
        source: serde_json::Error,
    },
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// `PRICING_FILE`, when set, must point at a JSON pricing configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the pricing file cannot be loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let pricing = match std::env::var("PRICING_FILE") {
            Ok(path) => {
                let pricing = load_pricing_file(&path)?;
                tracing::info!(path = %path, "Loaded pricing configuration from file");
                pricing
            }
            Err(_) => {
                tracing::debug!("PRICING_FILE not set, using default rates");
                defaults.pricing
            }
        };

        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            authz_url: std::env::var("AUTHZ_URL").ok().filter(|url| !url.is_empty()),
            pricing,
            alert_cooldown_seconds: env_parse("ALERT_COOLDOWN_SECONDS")
                .unwrap_or(defaults.alert_cooldown_seconds),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|origins| parse_origins(&origins))
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Load a pricing configuration from a JSON file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_pricing_file(path: impl AsRef<Path>) -> Result<PricingConfig, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/metering".into(),
            service_api_key: None,
            admin_api_key: None,
            authz_url: None,
            pricing: PricingConfig::default(),
            #[allow(clippy::cast_sign_loss)]
            alert_cooldown_seconds: DEFAULT_ALERT_COOLDOWN_SECS as u64,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024, // 1MB
            request_timeout_seconds: 30,
        }
    }
}
