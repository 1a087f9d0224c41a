//! Certificate backend trait definition.
//!
//! This module defines the `CertificateBackend` trait for the external PKI
//! authority that actually signs workload certificates.

use crate::certificate::error::{CertificateError, Result};
use crate::certificate::types::{CommonName, SecretString};
use async_trait::async_trait;
use std::time::Duration;

/// Type of certificate backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateBackendType {
    /// HashiCorp Vault PKI secrets engine
    VaultPki,
    /// In-memory backend for tests and local development
    Mock,
}

impl CertificateBackendType {
    /// Returns the string representation of the backend type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VaultPki => "vault_pki",
            Self::Mock => "mock",
        }
    }
}

impl std::fmt::Display for CertificateBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw issuance result as returned by a PKI backend.
///
/// The manager turns this into a [`Certificate`](crate::certificate::Certificate)
/// after [`IssuedCertificate::validate`] passes.
#[derive(Clone)]
pub struct IssuedCertificate {
    pub serial_number: String,
    /// PEM-encoded X.509 certificate
    pub certificate: String,
    /// PEM-encoded private key (redacted in logs)
    pub private_key: SecretString,
    /// PEM-encoded issuing CA
    pub issuing_ca: String,
    pub common_name: CommonName,
    /// Validity period that was requested from the backend
    pub validity: Duration,
}

impl IssuedCertificate {
    /// Reject results with a missing required field.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("serial_number", self.serial_number.is_empty()),
            ("certificate", self.certificate.is_empty()),
            ("private_key", self.private_key.is_empty()),
            ("issuing_ca", self.issuing_ca.is_empty()),
            ("common_name", self.common_name.as_str().is_empty()),
        ];

        match required.iter().find(|(_, missing)| *missing) {
            Some((field, _)) => Err(CertificateError::malformed_response(*field)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("serial_number", &self.serial_number)
            .field("certificate", &format!("[{} bytes PEM]", self.certificate.len()))
            .field("private_key", &self.private_key)
            .field("issuing_ca", &format!("[{} bytes PEM]", self.issuing_ca.len()))
            .field("common_name", &self.common_name)
            .field("validity", &self.validity)
            .finish()
    }
}

/// PKI authority abstraction.
///
/// The manager only ever asks a backend to issue. Authentication, connection
/// setup and per-call timeouts are the implementation's concern; any failure
/// surfaces to the manager as an error from [`CertificateBackend::issue`].
#[async_trait]
pub trait CertificateBackend: Send + Sync + std::fmt::Debug {
    /// Issue a new certificate for `common_name` valid for exactly `validity`.
    ///
    /// # Errors
    ///
    /// - `CertificateError::MalformedResponse` if the authority's answer lacks a field
    /// - `CertificateError::Issuance` if the authority refused or could not be reached
    async fn issue(&self, common_name: &CommonName, validity: Duration)
        -> Result<IssuedCertificate>;

    /// Get the type of this certificate backend.
    fn backend_type(&self) -> CertificateBackendType;

    /// Verify the backend is reachable without issuing anything.
    async fn health_check(&self) -> Result<()>;
}
