//! Background certificate rotation.
//!
//! The rotor wakes on a fixed interval, inspects the remaining lifetime of
//! every cached certificate, and rotates those that are expired or inside the
//! renewal margin. A failed rotation is logged and retried on the next tick;
//! it never stops the scan of the remaining certificates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::certificate::error::Result;
use crate::certificate::types::{chrono_duration, Certificate, CommonName};
use crate::config::RotationConfig;

/// What the rotor needs from the certificate manager.
#[async_trait]
pub(crate) trait RotationTarget: Send + Sync {
    /// Snapshot of the certificates currently cached.
    fn certificates(&self) -> Vec<Arc<Certificate>>;

    /// Rotate `common_name` only while `serial_number` is still the cached
    /// value. `Ok(None)` means it was released or already replaced.
    async fn rotate_if_current(
        &self,
        common_name: &CommonName,
        serial_number: &str,
    ) -> Result<Option<Arc<Certificate>>>;
}

#[async_trait]
impl<T: RotationTarget + ?Sized> RotationTarget for Arc<T> {
    fn certificates(&self) -> Vec<Arc<Certificate>> {
        (**self).certificates()
    }

    async fn rotate_if_current(
        &self,
        common_name: &CommonName,
        serial_number: &str,
    ) -> Result<Option<Arc<Certificate>>> {
        (**self).rotate_if_current(common_name, serial_number).await
    }
}

/// When a certificate is due for rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub renewal_margin: Duration,
    pub max_jitter: Duration,
}

impl RotationPolicy {
    pub fn new(renewal_margin: Duration, max_jitter: Duration) -> Self {
        Self { renewal_margin, max_jitter }
    }

    /// Due if expired, or if remaining lifetime is within `renewal_margin + jitter`.
    ///
    /// A threshold past the end of representable time counts as due.
    pub fn is_due(&self, certificate: &Certificate, now: DateTime<Utc>, jitter: Duration) -> bool {
        let window = chrono_duration(self.renewal_margin.saturating_add(jitter));
        match now.checked_add_signed(window) {
            Some(threshold) => certificate.expiration() <= threshold,
            None => true,
        }
    }

    /// [`RotationPolicy::is_due`] with a random jitter in `0..=max_jitter`.
    pub fn should_rotate(&self, certificate: &Certificate, now: DateTime<Utc>) -> bool {
        self.is_due(certificate, now, self.sample_jitter())
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

impl From<&RotationConfig> for RotationPolicy {
    fn from(config: &RotationConfig) -> Self {
        Self::new(config.renewal_margin(), config.max_jitter())
    }
}

/// Outcome of one scan over the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationSummary {
    pub checked: usize,
    pub due: usize,
    pub rotated: usize,
    /// Due, but released or replaced before the rotor got to it
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Rotor {
    policy: RotationPolicy,
    check_interval: Duration,
}

impl Rotor {
    pub(crate) fn new(config: &RotationConfig) -> Self {
        Self { policy: RotationPolicy::from(config), check_interval: config.check_interval() }
    }

    /// Tick until `shutdown` fires or `upgrade` reports the manager is gone.
    pub(crate) async fn run<T, F>(self, upgrade: F, shutdown: CancellationToken)
    where
        T: RotationTarget,
        F: Fn() -> Option<T> + Send,
    {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            renewal_margin_secs = self.policy.renewal_margin.as_secs(),
            "Starting certificate rotor"
        );

        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing is cached yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Certificate rotor received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let Some(target) = upgrade() else {
                        debug!("Certificate manager dropped, stopping rotor");
                        break;
                    };
                    self.check(&target, Utc::now(), &shutdown).await;
                }
            }
        }

        info!("Certificate rotor stopped");
    }

    /// Scan every cached certificate once as of `now`.
    pub(crate) async fn check<T: RotationTarget + ?Sized>(
        &self,
        target: &T,
        now: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> RotationSummary {
        let mut summary = RotationSummary::default();

        for certificate in target.certificates() {
            summary.checked += 1;

            if !self.policy.should_rotate(&certificate, now) {
                continue;
            }
            summary.due += 1;

            if shutdown.is_cancelled() {
                debug!("Shutdown requested, abandoning rotation scan");
                break;
            }

            let common_name = certificate.common_name();
            debug!(
                common_name = %common_name,
                serial_number = %certificate.serial_number(),
                expiration = %certificate.expiration(),
                "Certificate due for rotation"
            );

            match target.rotate_if_current(common_name, certificate.serial_number()).await {
                Ok(Some(rotated)) => {
                    summary.rotated += 1;
                    debug!(
                        common_name = %common_name,
                        serial_number = %rotated.serial_number(),
                        "Rotor replaced certificate"
                    );
                }
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        common_name = %common_name,
                        error = %e,
                        "Certificate rotation failed, will retry on next check"
                    );
                }
            }
        }

        if summary.failed > 0 {
            warn!(
                checked = summary.checked,
                rotated = summary.rotated,
                failed = summary.failed,
                "Rotation check finished with failures"
            );
        } else if summary.due > 0 {
            info!(
                checked = summary.checked,
                rotated = summary.rotated,
                skipped = summary.skipped,
                "Rotation check finished"
            );
        }

        summary
    }
}
