//! # meshcert
//!
//! Workload certificate management for a service mesh control plane.
//!
//! The [`CertManager`] issues short-lived X.509 identities for named
//! workloads through a pluggable PKI backend, caches them by common name,
//! rotates them in the background before they expire, and announces every
//! rotation so proxies can pick up the new material.
//!
//! ## Architecture
//!
//! ```text
//! callers ──► CertManager ──► CertificateBackend (Vault PKI | mock)
//!               │    ▲
//!        cache ─┘    └─ rotor (interval task)
//!               │
//!               └──► announcements (broadcast)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use meshcert::{CertManager, CertManagerConfig, MockCertificateBackend};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> meshcert::Result<()> {
//!     let backend = Arc::new(MockCertificateBackend::new());
//!     let manager = CertManager::new(backend, CertManagerConfig::default()).await?;
//!
//!     let cert = manager.issue_certificate("bookstore.default", Duration::from_secs(3600)).await?;
//!     println!("issued {} until {}", cert.serial_number(), cert.expiration());
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod certificate;
pub mod config;
pub mod observability;

pub use certificate::{
    Announcement, CertManager, Certificate, CertificateBackend, CertificateBackendType,
    CertificateError, CommonName, IssuedCertificate, MockCertificateBackend, Result,
    RotationPolicy, RotationSummary, SecretString, VaultPkiBackend, MOCK_ISSUING_CA,
};
pub use config::{CertManagerConfig, RotationConfig, VaultPkiConfig};
pub use observability::{init_logging, LoggingConfig};
