//! # Observability
//!
//! Log subscriber setup for binaries and tests that embed the certificate
//! manager. The manager itself only emits `tracing` events; it never installs
//! a subscriber.

pub mod logging;

pub use logging::{init_logging, LoggingConfig};
