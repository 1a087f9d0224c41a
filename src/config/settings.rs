//! # Configuration Settings
//!
//! Defines the configuration structures for the certificate manager and its
//! Vault PKI backend. Everything here is read once at construction.

use crate::certificate::error::{CertificateError, Result};
use crate::certificate::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Certificate manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CertManagerConfig {
    /// Validity period used when rotating service certificates
    #[validate(range(
        min = 60,
        max = 31_536_000,
        message = "Service certificate validity must be between 60 seconds and 365 days"
    ))]
    pub service_cert_validity_seconds: u64,

    /// Rotation scheduler policy
    #[validate(nested)]
    pub rotation: RotationConfig,

    /// Per-subscriber buffer of the announcement channel
    #[validate(range(min = 1, max = 65536, message = "Announcement capacity must be between 1 and 65536"))]
    pub announcement_capacity: usize,
}

impl Default for CertManagerConfig {
    fn default() -> Self {
        Self {
            service_cert_validity_seconds: 24 * 3600,
            rotation: RotationConfig::default(),
            announcement_capacity: 64,
        }
    }
}

impl CertManagerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// # Environment Variables
    ///
    /// - `MESHCERT_SERVICE_CERT_VALIDITY_SECONDS`
    /// - `MESHCERT_ROTATION_CHECK_INTERVAL_SECONDS`
    /// - `MESHCERT_RENEWAL_MARGIN_SECONDS`
    /// - `MESHCERT_ROTATION_JITTER_SECONDS`
    /// - `MESHCERT_ANNOUNCEMENT_CAPACITY`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            service_cert_validity_seconds: env_parse(
                "MESHCERT_SERVICE_CERT_VALIDITY_SECONDS",
                defaults.service_cert_validity_seconds,
            )?,
            rotation: RotationConfig {
                check_interval_seconds: env_parse(
                    "MESHCERT_ROTATION_CHECK_INTERVAL_SECONDS",
                    defaults.rotation.check_interval_seconds,
                )?,
                renewal_margin_seconds: env_parse(
                    "MESHCERT_RENEWAL_MARGIN_SECONDS",
                    defaults.rotation.renewal_margin_seconds,
                )?,
                max_jitter_seconds: env_parse(
                    "MESHCERT_ROTATION_JITTER_SECONDS",
                    defaults.rotation.max_jitter_seconds,
                )?,
            },
            announcement_capacity: env_parse(
                "MESHCERT_ANNOUNCEMENT_CAPACITY",
                defaults.announcement_capacity,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(CertificateError::from)?;

        if self.rotation.renewal_margin() >= self.service_cert_validity() {
            return Err(CertificateError::config_error(
                "Renewal margin must be shorter than the service certificate validity",
            ));
        }

        Ok(())
    }

    pub fn service_cert_validity(&self) -> Duration {
        Duration::from_secs(self.service_cert_validity_seconds)
    }
}

/// Rotation scheduler policy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RotationConfig {
    /// How often cached certificates are inspected
    #[validate(range(min = 1, max = 3600, message = "Check interval must be between 1 and 3600 seconds"))]
    pub check_interval_seconds: u64,

    /// Rotate once remaining lifetime drops to this many seconds
    #[validate(range(max = 31_536_000, message = "Renewal margin must not exceed 365 days"))]
    pub renewal_margin_seconds: u64,

    /// Upper bound of the random extra margin added per certificate per check
    #[validate(range(max = 3600, message = "Rotation jitter must not exceed 3600 seconds"))]
    pub max_jitter_seconds: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { check_interval_seconds: 5, renewal_margin_seconds: 30, max_jitter_seconds: 5 }
    }
}

impl RotationConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn renewal_margin(&self) -> Duration {
        Duration::from_secs(self.renewal_margin_seconds)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_secs(self.max_jitter_seconds)
    }
}

/// Connection settings for the Vault PKI secrets engine
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VaultPkiConfig {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    #[validate(length(min = 1, message = "Vault address cannot be empty"))]
    pub address: String,

    /// Vault authentication token
    pub token: SecretString,

    /// Vault namespace (for Enterprise multi-tenancy)
    pub namespace: Option<String>,

    /// PKI secrets engine mount path
    #[validate(length(min = 1, message = "PKI mount path cannot be empty"))]
    pub mount_path: String,

    /// PKI role scoping which identities Vault will issue for
    #[validate(length(min = 1, message = "PKI role cannot be empty"))]
    pub role: String,

    /// Timeout for a single issuance request
    #[validate(range(min = 1, max = 300, message = "Request timeout must be between 1 and 300 seconds"))]
    pub request_timeout_seconds: u64,
}

impl VaultPkiConfig {
    pub fn new(address: impl Into<String>, token: impl Into<SecretString>, role: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            namespace: None,
            mount_path: "pki".to_string(),
            role: role.into(),
            request_timeout_seconds: 30,
        }
    }

    /// Load Vault PKI settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `VAULT_ADDR`: Vault server address (required)
    /// - `VAULT_TOKEN`: Authentication token (required)
    /// - `VAULT_NAMESPACE`: Vault namespace (optional)
    /// - `MESHCERT_VAULT_PKI_MOUNT_PATH`: PKI mount path (default: "pki")
    /// - `MESHCERT_VAULT_PKI_ROLE`: PKI role (required)
    /// - `MESHCERT_VAULT_REQUEST_TIMEOUT_SECONDS`: per-request timeout (default: 30)
    pub fn from_env() -> Result<Self> {
        let address = std::env::var("VAULT_ADDR")
            .map_err(|_| CertificateError::config_error("VAULT_ADDR environment variable not set"))?;
        let token = std::env::var("VAULT_TOKEN")
            .map_err(|_| CertificateError::config_error("VAULT_TOKEN environment variable not set"))?;
        let role = std::env::var("MESHCERT_VAULT_PKI_ROLE").map_err(|_| {
            CertificateError::config_error("MESHCERT_VAULT_PKI_ROLE environment variable not set")
        })?;

        let mut config = Self::new(address, token, role);
        config.namespace = std::env::var("VAULT_NAMESPACE").ok().filter(|ns| !ns.is_empty());
        if let Ok(mount_path) = std::env::var("MESHCERT_VAULT_PKI_MOUNT_PATH") {
            config.mount_path = mount_path;
        }
        config.request_timeout_seconds =
            env_parse("MESHCERT_VAULT_REQUEST_TIMEOUT_SECONDS", config.request_timeout_seconds)?;

        Validate::validate(&config).map_err(CertificateError::from)?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| {
            CertificateError::config_error(format!("Invalid value for {}: {}", name, e))
        }),
        Err(_) => Ok(default),
    }
}
