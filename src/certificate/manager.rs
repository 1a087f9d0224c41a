//! Certificate manager.
//!
//! Owns the certificate cache, the root trust anchor, the announcement
//! channel and the background rotor, and exposes the public contract:
//! issue, rotate, release, get, list, get-root and subscribe.
//!
//! # Concurrency
//!
//! All operations take `&self` and may run concurrently from any number of
//! tasks. First issuance for a common name is single-flight: concurrent
//! callers that miss the cache wait on a per-name lock and the ones that
//! arrive second find the certificate the first caller stored, so the
//! backend is called once. Rotation takes the same per-name lock.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshcert::{CertManager, CertManagerConfig, VaultPkiConfig};
//! use std::time::Duration;
//!
//! let manager = CertManager::connect_vault(
//!     VaultPkiConfig::from_env()?,
//!     CertManagerConfig::from_env()?,
//! )
//! .await?;
//!
//! let cert = manager.issue_certificate("bookstore.default", Duration::from_secs(3600)).await?;
//! let mut announcements = manager.subscribe_announcements();
//! // ... later
//! manager.shutdown().await;
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::announcements::{Announcement, Announcer};
use super::backends::{CertificateBackend, CertificateBackendType, IssuedCertificate, VaultPkiBackend};
use super::cache::{CertificateCache, IssuanceLocks};
use super::error::{CertificateError, Result};
use super::rotor::{RotationSummary, RotationTarget, Rotor};
use super::types::{Certificate, CommonName, SecretString};
use crate::config::{CertManagerConfig, VaultPkiConfig};

/// Common name of the root trust anchor.
pub const ROOT_CA_COMMON_NAME: &str = "mesh-root-ca";

/// Common name of the throwaway certificate issued to learn the issuing CA.
pub const PROBE_COMMON_NAME: &str = "localhost";

/// Validity of the throwaway probe certificate.
pub const PROBE_VALIDITY: Duration = Duration::from_secs(1);

/// Validity recorded for the root trust anchor (roughly a decade).
pub const ROOT_VALIDITY: Duration = Duration::from_secs(8765 * 3600);

/// Handle to the certificate manager. Cheap to clone; all clones share state.
///
/// The rotor stops when [`CertManager::shutdown`] is called or when the last
/// handle is dropped.
#[derive(Clone)]
pub struct CertManager {
    pub(crate) inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    backend: Arc<dyn CertificateBackend>,
    config: CertManagerConfig,
    cache: CertificateCache,
    locks: IssuanceLocks,
    announcer: Announcer,
    root: Arc<Certificate>,
    rotor: Rotor,
    span: Span,
    shutdown: CancellationToken,
    rotor_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for CertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertManager")
            .field("backend", &self.inner.backend)
            .field("root_serial", &self.inner.root.serial_number())
            .field("cached", &self.inner.cache.len())
            .field("shut_down", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl CertManager {
    /// Bootstrap a manager on top of `backend` and start the rotor.
    ///
    /// Issues one probe certificate to learn the issuing CA, derives the
    /// root trust anchor from it, then spawns the rotor on the current Tokio
    /// runtime. Log records go to a `cert_manager` span.
    ///
    /// # Errors
    ///
    /// - `CertificateError::Config` if `config` fails validation
    /// - `CertificateError::Issuance` if the probe issuance fails
    pub async fn new(backend: Arc<dyn CertificateBackend>, config: CertManagerConfig) -> Result<Self> {
        let span = info_span!("cert_manager", backend = %backend.backend_type());
        Self::with_span(backend, config, span).await
    }

    /// Like [`CertManager::new`], emitting every log record inside `span`.
    pub async fn with_span(
        backend: Arc<dyn CertificateBackend>,
        config: CertManagerConfig,
        span: Span,
    ) -> Result<Self> {
        config.validate()?;

        let root = bootstrap_root(backend.as_ref()).instrument(span.clone()).await?;

        let inner = Arc::new(ManagerInner {
            announcer: Announcer::new(config.announcement_capacity),
            rotor: Rotor::new(&config.rotation),
            backend,
            config,
            cache: CertificateCache::new(),
            locks: IssuanceLocks::new(),
            root: Arc::new(root),
            span,
            shutdown: CancellationToken::new(),
            rotor_task: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let rotor = inner.rotor.clone();
        let task = tokio::spawn(
            rotor
                .run(move || weak.upgrade().map(|inner| CertManager { inner }), inner.shutdown.clone())
                .instrument(inner.span.clone()),
        );
        if let Ok(mut slot) = inner.rotor_task.lock() {
            *slot = Some(task);
        }

        inner.span.in_scope(|| {
            info!(
                root_serial = %inner.root.serial_number(),
                root_expiration = %inner.root.expiration(),
                "Created certificate manager"
            );
        });

        Ok(Self { inner })
    }

    /// Connect to Vault PKI and bootstrap a manager on it.
    ///
    /// # Errors
    ///
    /// - `CertificateError::BackendUnavailable` if the Vault client cannot be
    ///   created or Vault is unreachable
    /// - `CertificateError::Issuance` if the probe issuance fails
    pub async fn connect_vault(vault: VaultPkiConfig, config: CertManagerConfig) -> Result<Self> {
        let span = info_span!("cert_manager", backend = "vault_pki", role = %vault.role);
        let backend = VaultPkiBackend::connect(vault).instrument(span.clone()).await?;
        Self::with_span(Arc::new(backend), config, span).await
    }

    /// Return the live cached certificate for `common_name`, or issue one
    /// valid for exactly `validity` and cache it.
    ///
    /// A cache hit makes no backend call. On failure nothing is cached.
    pub async fn issue_certificate(
        &self,
        common_name: impl Into<CommonName>,
        validity: Duration,
    ) -> Result<Arc<Certificate>> {
        let common_name = common_name.into();
        let inner = &self.inner;

        async {
            if let Some(cert) = inner.cache.get_live(common_name.as_str(), Utc::now()) {
                return Ok(cert);
            }

            let guard = inner.locks.acquire(&common_name).await;

            // Another caller may have issued while we waited for the lock.
            if let Some(cert) = inner.cache.get_live(common_name.as_str(), Utc::now()) {
                debug!(common_name = %common_name, "Certificate issued by concurrent caller");
                return Ok(cert);
            }

            info!(common_name = %common_name, "Issuing new certificate");
            let start = Instant::now();

            let cert = match inner.issue_from_backend(&common_name, validity).await {
                Ok(cert) => cert,
                Err(e) => {
                    inner.unlock(guard, &common_name);
                    return Err(e);
                }
            };
            inner.cache.store(Arc::clone(&cert));

            info!(
                common_name = %common_name,
                serial_number = %cert.serial_number(),
                expiration = %cert.expiration(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Issued new certificate"
            );
            Ok(cert)
        }
        .instrument(inner.span.clone())
        .await
    }

    /// Issue a fresh certificate for `common_name` with the configured
    /// service validity, replace the cache entry, and announce the change.
    ///
    /// Always calls the backend. On failure the previous entry is untouched.
    pub async fn rotate_certificate(&self, common_name: impl Into<CommonName>) -> Result<Arc<Certificate>> {
        let common_name = common_name.into();
        let inner = &self.inner;

        async {
            let guard = inner.locks.acquire(&common_name).await;
            let rotated = inner.rotate_locked(&common_name, None).await;
            inner.unlock(guard, &common_name);

            rotated?.ok_or_else(|| CertificateError::not_found(common_name.as_str()))
        }
        .instrument(inner.span.clone())
        .await
    }

    /// Drop the cached certificate for `common_name`. Absent names are ignored.
    pub fn release_certificate(&self, common_name: impl AsRef<str>) {
        let common_name = common_name.as_ref();
        let _entered = self.inner.span.enter();

        match self.inner.cache.remove(common_name) {
            Some(cert) => info!(
                common_name = %common_name,
                serial_number = %cert.serial_number(),
                "Released certificate"
            ),
            None => debug!(common_name = %common_name, "Release requested for uncached certificate"),
        }
        self.inner.locks.prune(common_name);
    }

    /// Cached, unexpired certificate for `common_name`. Never issues.
    pub fn get_certificate(&self, common_name: impl AsRef<str>) -> Result<Arc<Certificate>> {
        let common_name = common_name.as_ref();
        self.inner
            .cache
            .get_live(common_name, Utc::now())
            .ok_or_else(|| CertificateError::not_found(common_name))
    }

    /// Snapshot of every cached certificate, in no particular order.
    pub fn list_certificates(&self) -> Vec<Arc<Certificate>> {
        self.inner.cache.snapshot()
    }

    /// The root trust anchor learned at bootstrap.
    pub fn get_root_certificate(&self) -> Arc<Certificate> {
        Arc::clone(&self.inner.root)
    }

    /// Subscribe to rotation announcements.
    ///
    /// Each subscriber receives every announcement published after it
    /// subscribed, buffered up to `announcement_capacity`; beyond that the
    /// oldest are dropped and `recv` reports `Lagged`.
    pub fn subscribe_announcements(&self) -> broadcast::Receiver<Announcement> {
        self.inner.announcer.subscribe()
    }

    /// Run one rotor scan as of `now`, the same scan the background loop
    /// performs with the wall clock. Does nothing after shutdown.
    pub async fn run_rotation_check(&self, now: DateTime<Utc>) -> RotationSummary {
        let inner = &self.inner;
        inner.rotor.check(self, now, &inner.shutdown).instrument(inner.span.clone()).await
    }

    /// Configuration the manager was built with.
    pub fn config(&self) -> &CertManagerConfig {
        &self.inner.config
    }

    /// Which PKI backend issues this manager's certificates.
    pub fn backend_type(&self) -> CertificateBackendType {
        self.inner.backend.backend_type()
    }

    /// Stop the rotor and wait for it to exit. Safe to call more than once.
    ///
    /// Issue, rotate and lookup calls keep working afterwards; only the
    /// background rotation stops.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let task = self.inner.rotor_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                self.inner.span.in_scope(|| error!(error = %e, "Certificate rotor task failed"));
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl ManagerInner {
    /// Call the backend and turn its answer into a certificate. Every
    /// backend failure is reported as an issuance error.
    async fn issue_from_backend(
        &self,
        common_name: &CommonName,
        validity: Duration,
    ) -> Result<Arc<Certificate>> {
        let issued_at = Utc::now();

        let issued = self
            .backend
            .issue(common_name, validity)
            .await
            .and_then(|issued| issued.validate().map(|()| issued))
            .map_err(|e| {
                error!(common_name = %common_name, error = %e, "Error issuing new certificate");
                as_issuance_error(common_name, e)
            })?;

        if issued.common_name != *common_name {
            error!(
                common_name = %common_name,
                issued_for = %issued.common_name,
                "Backend issued certificate for a different common name"
            );
            return Err(CertificateError::issuance(
                common_name.as_str(),
                format!("backend issued certificate for CN={}", issued.common_name),
            ));
        }

        Ok(Arc::new(certificate_from_issued(issued, issued_at)))
    }

    /// Rotation body; the caller holds the per-name lock.
    ///
    /// With `current_serial` set, the new certificate only replaces a cache
    /// entry that still carries that serial. A release that lands while the
    /// backend call is in flight wins and the new certificate is discarded
    /// (`Ok(None)`). Without it the entry is overwritten unconditionally.
    async fn rotate_locked(
        &self,
        common_name: &CommonName,
        current_serial: Option<&str>,
    ) -> Result<Option<Arc<Certificate>>> {
        info!(common_name = %common_name, "Rotating certificate");
        let start = Instant::now();

        let cert = self
            .issue_from_backend(common_name, self.config.service_cert_validity())
            .await
            .inspect_err(|e| warn!(common_name = %common_name, error = %e, "Certificate rotation failed"))?;

        let previous = match current_serial {
            None => self.cache.store(Arc::clone(&cert)),
            Some(expected) => match self.cache.replace_if_current(Arc::clone(&cert), expected) {
                Some(previous) => Some(previous),
                None => {
                    info!(
                        common_name = %common_name,
                        discarded_serial = %cert.serial_number(),
                        "Certificate released or replaced during rotation, discarding new certificate"
                    );
                    return Ok(None);
                }
            },
        };
        let previous_serial = previous.map(|p| p.serial_number().to_string());

        let reached = self.announcer.publish(Announcement::CertificateRotated {
            common_name: common_name.clone(),
            previous_serial: previous_serial.clone(),
            serial_number: cert.serial_number().to_string(),
        });

        info!(
            common_name = %common_name,
            previous_serial = ?previous_serial,
            serial_number = %cert.serial_number(),
            subscribers = reached,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rotated certificate"
        );
        Ok(Some(cert))
    }

    /// Release the per-name lock, dropping it once the name is no longer cached.
    fn unlock(&self, guard: OwnedMutexGuard<()>, common_name: &CommonName) {
        drop(guard);
        if self.cache.get_any(common_name.as_str()).is_none() {
            self.locks.prune(common_name.as_str());
        }
    }
}

#[async_trait]
impl RotationTarget for CertManager {
    fn certificates(&self) -> Vec<Arc<Certificate>> {
        self.list_certificates()
    }

    async fn rotate_if_current(
        &self,
        common_name: &CommonName,
        serial_number: &str,
    ) -> Result<Option<Arc<Certificate>>> {
        let inner = &self.inner;
        let guard = inner.locks.acquire(common_name).await;

        let rotated = match inner.cache.get_any(common_name.as_str()) {
            Some(current) if current.serial_number() == serial_number => {
                inner.rotate_locked(common_name, Some(serial_number)).await
            }
            _ => {
                debug!(common_name = %common_name, "Certificate released or replaced before rotation");
                Ok(None)
            }
        };

        inner.unlock(guard, common_name);
        rotated
    }
}

/// Issue the probe certificate and derive the root trust anchor from its issuing CA.
async fn bootstrap_root(backend: &dyn CertificateBackend) -> Result<Certificate> {
    let probe_cn = CommonName::from(PROBE_COMMON_NAME);

    let probe = backend
        .issue(&probe_cn, PROBE_VALIDITY)
        .await
        .and_then(|issued| issued.validate().map(|()| issued))
        .map_err(|e| {
            error!(error = %e, "Failed to issue probe certificate to learn the issuing CA");
            as_issuance_error(&probe_cn, e)
        })?;

    debug!(probe_serial = %probe.serial_number, "Issued probe certificate");
    Ok(root_from_issuing_ca(&probe.issuing_ca, Utc::now()))
}

fn root_from_issuing_ca(issuing_ca: &str, now: DateTime<Utc>) -> Certificate {
    Certificate::new(
        CommonName::from(ROOT_CA_COMMON_NAME),
        now,
        ROOT_VALIDITY,
        issuing_ca.to_string(),
        SecretString::default(),
        issuing_ca.to_string(),
        fingerprint(issuing_ca),
    )
}

/// First 16 bytes of the SHA-256 of `material`, hex encoded.
fn fingerprint(material: &str) -> String {
    let digest = Sha256::digest(material.as_bytes());
    hex::encode(&digest[..16])
}

fn certificate_from_issued(issued: IssuedCertificate, issued_at: DateTime<Utc>) -> Certificate {
    Certificate::new(
        issued.common_name,
        issued_at,
        issued.validity,
        issued.certificate,
        issued.private_key,
        issued.issuing_ca,
        issued.serial_number,
    )
}

fn as_issuance_error(common_name: &CommonName, error: CertificateError) -> CertificateError {
    match error {
        CertificateError::Issuance { .. } => error,
        other => CertificateError::issuance(common_name.as_str(), other.to_string()),
    }
}
