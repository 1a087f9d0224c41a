//! Rotation announcements.
//!
//! Every successful rotation publishes one [`Announcement`]. The channel is a
//! bounded broadcast: each subscriber has its own queue of
//! `announcement_capacity` events, a subscriber that falls behind loses the
//! oldest events (its next `recv` reports `Lagged`), and publishing never
//! waits for a consumer.

use crate::certificate::types::CommonName;
use tokio::sync::broadcast;
use tracing::trace;

/// Event describing a change to mesh identity material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    CertificateRotated {
        common_name: CommonName,
        /// Serial of the cached certificate that was replaced, if any
        previous_serial: Option<String>,
        serial_number: String,
    },
}

impl Announcement {
    pub fn common_name(&self) -> &CommonName {
        match self {
            Self::CertificateRotated { common_name, .. } => common_name,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Announcer {
    tx: broadcast::Sender<Announcement>,
}

impl Announcer {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish without blocking. Returns the number of subscribers reached.
    pub(crate) fn publish(&self, announcement: Announcement) -> usize {
        match self.tx.send(announcement) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(dropped)) => {
                trace!(common_name = %dropped.common_name(), "No announcement subscribers");
                0
            }
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Announcement> {
        self.tx.subscribe()
    }
}
