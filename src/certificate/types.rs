//! Certificate entity and the value types it is built from.
//!
//! A [`Certificate`] is immutable once constructed. Renewal always produces a
//! new value with a new serial number; nothing in this crate edits a
//! certificate in place.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Workload identity a certificate is issued for. Used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommonName(String);

impl CommonName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CommonName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CommonName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CommonName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&CommonName> for CommonName {
    fn from(cn: &CommonName) -> Self {
        cn.clone()
    }
}

/// PEM material that must never reach logs.
///
/// Debug and Display print `[REDACTED]`, serialization emits `"[REDACTED]"`,
/// and the buffer is zeroed on drop.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One issued workload identity.
///
/// Identity is the serial number: two certificates may share a common name
/// across time but never a serial number, so `PartialEq` and `Hash` only look
/// at [`Certificate::serial_number`].
#[derive(Clone)]
pub struct Certificate {
    common_name: CommonName,
    issued_at: DateTime<Utc>,
    expiration: DateTime<Utc>,
    cert_chain: String,
    private_key: SecretString,
    issuing_ca: String,
    serial_number: String,
}

impl Certificate {
    /// Build a certificate whose expiration is `issued_at + validity`.
    pub(crate) fn new(
        common_name: CommonName,
        issued_at: DateTime<Utc>,
        validity: Duration,
        cert_chain: String,
        private_key: SecretString,
        issuing_ca: String,
        serial_number: String,
    ) -> Self {
        let expiration = issued_at
            .checked_add_signed(chrono_duration(validity))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            common_name,
            issued_at,
            expiration,
            cert_chain,
            private_key,
            issuing_ca,
            serial_number,
        }
    }

    pub fn common_name(&self) -> &CommonName {
        &self.common_name
    }

    /// PEM encoded certificate chain.
    pub fn cert_chain(&self) -> &[u8] {
        self.cert_chain.as_bytes()
    }

    /// PEM encoded private key paired with [`Certificate::cert_chain`].
    pub fn private_key(&self) -> &[u8] {
        self.private_key.expose_secret().as_bytes()
    }

    /// PEM encoded root or intermediate that signed this certificate.
    pub fn issuing_ca(&self) -> &[u8] {
        self.issuing_ca.as_bytes()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }

    /// Remaining lifetime at `now`, or `None` once expired.
    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expiration - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.serial_number == other.serial_number
    }
}

impl Eq for Certificate {}

impl Hash for Certificate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serial_number.hash(state);
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("common_name", &self.common_name)
            .field("serial_number", &self.serial_number)
            .field("issued_at", &self.issued_at)
            .field("expiration", &self.expiration)
            .field("cert_chain", &format!("[{} bytes PEM]", self.cert_chain.len()))
            .field("private_key", &self.private_key)
            .field("issuing_ca", &format!("[{} bytes PEM]", self.issuing_ca.len()))
            .finish()
    }
}

/// Saturating conversion; validity periods beyond chrono's range clamp to its max.
pub(crate) fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
