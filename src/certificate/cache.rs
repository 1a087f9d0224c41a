//! Certificate cache keyed by common name.
//!
//! The cache never sweeps itself: expiry is enforced when reading and by the
//! rotor, not by evicting entries on a timer.

use crate::certificate::types::{Certificate, CommonName};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Debug, Default)]
pub(crate) struct CertificateCache {
    entries: DashMap<CommonName, Arc<Certificate>>,
}

impl CertificateCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Cached certificate for `common_name` if it has not expired at `now`.
    pub(crate) fn get_live(&self, common_name: &str, now: DateTime<Utc>) -> Option<Arc<Certificate>> {
        let entry = self.entries.get(common_name)?;
        if entry.is_expired_at(now) {
            trace!(common_name = %common_name, "Certificate found in cache but has expired");
            return None;
        }
        trace!(common_name = %common_name, "Certificate found in cache");
        Some(Arc::clone(entry.value()))
    }

    /// Cached certificate regardless of expiry.
    pub(crate) fn get_any(&self, common_name: &str) -> Option<Arc<Certificate>> {
        self.entries.get(common_name).map(|entry| Arc::clone(entry.value()))
    }

    /// Store `certificate`, returning the entry it replaced.
    pub(crate) fn store(&self, certificate: Arc<Certificate>) -> Option<Arc<Certificate>> {
        self.entries.insert(certificate.common_name().clone(), certificate)
    }

    /// Store `certificate` only if the entry for its name still carries
    /// `expected_serial`. Returns the replaced entry, or `None` if the name
    /// was released or already replaced.
    pub(crate) fn replace_if_current(
        &self,
        certificate: Arc<Certificate>,
        expected_serial: &str,
    ) -> Option<Arc<Certificate>> {
        match self.entries.entry(certificate.common_name().clone()) {
            Entry::Occupied(mut entry) if entry.get().serial_number() == expected_serial => {
                Some(entry.insert(certificate))
            }
            _ => None,
        }
    }

    pub(crate) fn remove(&self, common_name: &str) -> Option<Arc<Certificate>> {
        self.entries.remove(common_name).map(|(_, cert)| cert)
    }

    /// Point-in-time copy of all entries. Not transactional across shards.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Certificate>> {
        self.entries.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-common-name async locks so concurrent issuers for one name collapse
/// into a single backend call.
#[derive(Debug, Default)]
pub(crate) struct IssuanceLocks {
    locks: DashMap<CommonName, Arc<Mutex<()>>>,
}

impl IssuanceLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn acquire(&self, common_name: &CommonName) -> OwnedMutexGuard<()> {
        // Clone the Arc out before awaiting so no map shard stays locked.
        let lock = Arc::clone(self.locks.entry(common_name.clone()).or_default().value());
        lock.lock_owned().await
    }

    /// Drop the lock for `common_name` unless someone is holding or waiting on it.
    pub(crate) fn prune(&self, common_name: &str) {
        self.locks.remove_if(common_name, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
