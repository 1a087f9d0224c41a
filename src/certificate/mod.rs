//! # Certificate Management
//!
//! Issuance, caching, rotation and announcement of workload certificates.
//!
//! ## Components
//!
//! - [`CertManager`]: public entry point; owns the cache and the rotor
//! - [`backends`]: the PKI adapter trait and its Vault and mock implementations
//! - [`Announcement`]: event published on every rotation
//! - [`RotationPolicy`]: decides when a cached certificate is due
//!
//! Private keys are held in [`SecretString`] and never appear in `Debug`
//! output or log records.

mod announcements;
pub mod backends;
mod cache;
pub mod error;
mod manager;
mod rotor;
mod types;

pub use announcements::Announcement;
pub use backends::{
    CertificateBackend, CertificateBackendType, IssuedCertificate, MockCertificateBackend,
    RetryConfig, VaultPkiBackend, MOCK_ISSUING_CA,
};
pub use error::{CertificateError, Result};
pub use manager::{
    CertManager, PROBE_COMMON_NAME, PROBE_VALIDITY, ROOT_CA_COMMON_NAME, ROOT_VALIDITY,
};
pub use rotor::{RotationPolicy, RotationSummary};
pub use types::{Certificate, CommonName, SecretString};
