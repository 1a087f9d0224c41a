//! # Configuration
//!
//! Manager policy knobs and PKI backend connection settings, loaded from the
//! environment or built in code.

pub mod settings;

pub use settings::{CertManagerConfig, RotationConfig, VaultPkiConfig};
