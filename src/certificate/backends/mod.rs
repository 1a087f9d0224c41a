//! PKI backend adapters.
//!
//! The manager depends only on the [`CertificateBackend`] trait:
//! - **VaultPkiBackend**: production backend using HashiCorp Vault PKI
//! - **MockCertificateBackend**: in-memory backend for tests and local development

mod backend;
mod mock;
mod vault_pki;

pub use backend::{CertificateBackend, CertificateBackendType, IssuedCertificate};
pub use mock::{MockCertificateBackend, MOCK_ISSUING_CA};
pub use vault_pki::{RetryConfig, VaultPkiBackend};
