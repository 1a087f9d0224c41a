//! # Structured Logging
//!
//! Installs a global `tracing` subscriber with an `EnvFilter`. `RUST_LOG`
//! overrides the configured level when set.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::certificate::error::{CertificateError, Result};

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `meshcert=debug`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl LoggingConfig {
    /// Load from `MESHCERT_LOG_LEVEL` and `MESHCERT_LOG_JSON`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: std::env::var("MESHCERT_LOG_LEVEL").unwrap_or(defaults.level),
            json: std::env::var("MESHCERT_LOG_JSON")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.json),
        }
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level).map_err(|e| {
                CertificateError::config_error(format!("Invalid log level '{}': {}", self.level, e))
            }),
        }
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` if a subscriber was already installed elsewhere
/// (for example by a test harness); that is not an error.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = config.env_filter()?;

    let installed = if config.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(true).try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init()
    };

    Ok(installed.is_ok())
}
