//! Vault PKI certificate backend implementation.
//!
//! Issues workload certificates through HashiCorp Vault's PKI secrets engine
//! (`<mount>/issue/<role>`).

use super::backend::{CertificateBackend, CertificateBackendType, IssuedCertificate};
use crate::certificate::error::{CertificateError, Result};
use crate::certificate::types::{CommonName, SecretString};
use crate::config::VaultPkiConfig;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};

/// Retry behavior for transient Vault failures within a single issuance.
///
/// The default makes a single attempt. When more attempts are configured,
/// only failures where Vault cannot have minted a certificate are retried
/// (refused connections, 429, 503); a request that may have reached the
/// PKI engine is never re-sent.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub initial_backoff: Duration,
    /// Cap for exponential growth
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before attempt number `attempt` (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = self.backoff_multiplier.powi(attempt as i32 - 1);
        let backoff_ms = self.initial_backoff.as_millis() as f64 * multiplier;
        let capped_ms = backoff_ms.min(self.max_backoff.as_millis() as f64);

        Duration::from_millis(capped_ms as u64)
    }
}

/// Vault PKI certificate backend.
pub struct VaultPkiBackend {
    client: VaultClient,
    config: VaultPkiConfig,
    retry_config: RetryConfig,
}

impl std::fmt::Debug for VaultPkiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultPkiBackend")
            .field("address", &self.config.address)
            .field("pki_mount", &self.config.mount_path)
            .field("pki_role", &self.config.role)
            .field("retry_config", &self.retry_config)
            .field("client", &"[VaultClient]")
            .finish()
    }
}

impl VaultPkiBackend {
    /// Build a Vault client for `config` without contacting Vault.
    ///
    /// # Errors
    ///
    /// `CertificateError::BackendUnavailable` if the client cannot be created.
    pub fn new(config: VaultPkiConfig) -> Result<Self> {
        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&config.address);
        settings_builder.token(config.token.expose_secret());

        if let Some(namespace) = config.namespace.clone() {
            settings_builder.namespace(Some(namespace));
        }

        let settings = settings_builder.build().map_err(|e| {
            CertificateError::backend_unavailable(format!(
                "Invalid Vault configuration for {}: {}",
                config.address, e
            ))
        })?;

        let client = VaultClient::new(settings).map_err(|e| {
            CertificateError::backend_unavailable(format!(
                "Error creating Vault client at {}: {}",
                config.address, e
            ))
        })?;

        Ok(Self { client, config, retry_config: RetryConfig::default() })
    }

    /// Build the client and verify Vault answers its health endpoint.
    ///
    /// # Errors
    ///
    /// `CertificateError::BackendUnavailable` if the client cannot be built or
    /// Vault is unreachable.
    pub async fn connect(config: VaultPkiConfig) -> Result<Self> {
        let backend = Self::new(config)?;

        backend.health_check().await?;

        info!(
            vault_addr = %backend.config.address,
            pki_mount = %backend.config.mount_path,
            pki_role = %backend.config.role,
            "Vault PKI certificate backend initialized"
        );

        Ok(backend)
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    async fn issue_with_retry(
        &self,
        common_name: &CommonName,
        validity: Duration,
    ) -> Result<IssuedCertificate> {
        use vaultrs::pki::cert;

        // Vault takes a duration string; whole seconds, never zero.
        let ttl = format!("{}s", validity.as_secs().max(1));
        let request_timeout = self.config.request_timeout();

        let mut last_error = String::new();

        for attempt in 0..self.retry_config.max_attempts {
            if attempt > 0 {
                let backoff = self.retry_config.backoff_for_attempt(attempt);
                warn!(
                    common_name = %common_name,
                    attempt = attempt + 1,
                    max_attempts = self.retry_config.max_attempts,
                    backoff_ms = backoff.as_millis(),
                    "Retrying Vault PKI issuance after backoff"
                );
                tokio::time::sleep(backoff).await;
            }

            let mut opts =
                vaultrs::api::pki::requests::GenerateCertificateRequestBuilder::default();
            opts.common_name(common_name.as_str());
            opts.ttl(&ttl);

            let call = cert::generate(
                &self.client,
                &self.config.mount_path,
                &self.config.role,
                Some(&mut opts),
            );

            let outcome = match tokio::time::timeout(request_timeout, call).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("request timed out after {:?}", request_timeout)),
            };

            match outcome {
                Ok(response) => {
                    let issued = IssuedCertificate {
                        serial_number: response.serial_number,
                        certificate: response.certificate,
                        private_key: SecretString::new(response.private_key),
                        issuing_ca: response.issuing_ca,
                        common_name: common_name.clone(),
                        validity,
                    };
                    issued.validate().inspect_err(|e| {
                        error!(common_name = %common_name, error = %e, "Malformed Vault PKI response");
                    })?;

                    debug!(
                        common_name = %common_name,
                        serial_number = %issued.serial_number,
                        ttl = %ttl,
                        "Vault PKI issued certificate"
                    );
                    return Ok(issued);
                }
                Err(message) => {
                    if is_retryable_vault_error(&message)
                        && attempt + 1 < self.retry_config.max_attempts
                    {
                        warn!(
                            common_name = %common_name,
                            error = %message,
                            attempt = attempt + 1,
                            "Transient Vault PKI error, will retry"
                        );
                        last_error = message;
                        continue;
                    }

                    error!(
                        common_name = %common_name,
                        error = %message,
                        "Error issuing new certificate via Vault PKI"
                    );
                    return Err(CertificateError::issuance(
                        common_name.as_str(),
                        format!("Vault PKI issuance failed: {}", message),
                    ));
                }
            }
        }

        Err(CertificateError::issuance(
            common_name.as_str(),
            format!(
                "Vault PKI issuance failed after {} attempts: {}",
                self.retry_config.max_attempts, last_error
            ),
        ))
    }
}

/// Check if a Vault error was raised before the PKI engine could issue.
///
/// Refused connections and DNS failures never reach Vault; 429 and 503 are
/// returned before the request is handled. Resets, 5xx during handling and
/// timeouts are excluded: Vault may already have signed a certificate.
fn is_retryable_vault_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    let not_sent = ["connection refused", "dns error", "failed to lookup address"];
    let rejected = ["429", "too many requests", "503", "service unavailable"];

    not_sent.iter().chain(rejected.iter()).any(|p| error_lower.contains(p))
}

#[async_trait]
impl CertificateBackend for VaultPkiBackend {
    async fn issue(
        &self,
        common_name: &CommonName,
        validity: Duration,
    ) -> Result<IssuedCertificate> {
        debug!(
            common_name = %common_name,
            validity_secs = validity.as_secs(),
            pki_mount = %self.config.mount_path,
            role = %self.config.role,
            "Requesting certificate from Vault PKI"
        );

        self.issue_with_retry(common_name, validity).await
    }

    fn backend_type(&self) -> CertificateBackendType {
        CertificateBackendType::VaultPki
    }

    async fn health_check(&self) -> Result<()> {
        match vaultrs::sys::health(&self.client).await {
            Ok(_) => {
                debug!("Vault PKI backend health check passed");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, vault_addr = %self.config.address, "Vault PKI backend health check failed");
                Err(CertificateError::backend_unavailable(format!(
                    "Vault health check failed: {}",
                    e
                )))
            }
        }
    }
}
