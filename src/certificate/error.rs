//! Error types for certificate issuance and caching.

use thiserror::Error;

/// Result type for certificate operations.
pub type Result<T> = std::result::Result<T, CertificateError>;

/// Errors that can occur while issuing, rotating, or looking up certificates.
#[derive(Error, Debug)]
pub enum CertificateError {
    /// A session with the PKI backend could not be established.
    #[error("PKI backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// A specific issue or rotate call failed.
    #[error("Failed to issue certificate for CN={common_name}: {message}")]
    Issuance { common_name: String, message: String },

    /// No live certificate is cached for the common name.
    #[error("Certificate not found for CN={common_name}")]
    NotFound { common_name: String },

    /// The backend answered but a required field was missing or empty.
    #[error("Malformed PKI response: missing or empty field '{field}'")]
    MalformedResponse { field: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CertificateError {
    /// Create a backend unavailable error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable { message: message.into() }
    }

    /// Create an issuance error.
    pub fn issuance(common_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Issuance { common_name: common_name.into(), message: message.into() }
    }

    /// Create a not found error.
    pub fn not_found(common_name: impl Into<String>) -> Self {
        Self::NotFound { common_name: common_name.into() }
    }

    /// Create a malformed response error.
    pub fn malformed_response(field: impl Into<String>) -> Self {
        Self::MalformedResponse { field: field.into() }
    }

    /// Create a config error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Whether this error belongs to the issuance failure family.
    ///
    /// Malformed backend responses count as issuance failures.
    pub fn is_issuance_failure(&self) -> bool {
        matches!(self, Self::Issuance { .. } | Self::MalformedResponse { .. })
    }
}

impl From<validator::ValidationErrors> for CertificateError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();
        collect_validation_messages("", &errors, &mut messages);
        messages.sort();

        Self::config_error(format!("Validation failed: {}", messages.join("; ")))
    }
}

/// Flatten field, nested struct and list errors into `path: message` entries.
fn collect_validation_messages(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<String>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path =
            if prefix.is_empty() { field.to_string() } else { format!("{}.{}", prefix, field) };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                out.push(format!("{}: {}", path, messages.join(", ")));
            }
            ValidationErrorsKind::Struct(nested) => {
                collect_validation_messages(&path, nested, out);
            }
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_validation_messages(&format!("{}[{}]", path, index), nested, out);
                }
            }
        }
    }
}
