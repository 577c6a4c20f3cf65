//! Signing keys and the rotating key ring

use chrono::{DateTime, Utc};
use std::fmt;

/// Context string for deriving MAC keys from operator secrets
const KEY_DERIVATION_CONTEXT: &str = "cfgvault 2024-06 download token mac key";

/// 256-bit keyed-BLAKE3 MAC key
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    /// Derive a key from an operator-supplied secret
    #[must_use]
    pub fn from_secret(secret: &[u8]) -> Self {
        Self(blake3::derive_key(KEY_DERIVATION_CONTEXT, secret))
    }

    /// Fresh random key
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Short non-secret identifier for logs
    #[must_use]
    pub fn key_id(&self) -> String {
        let digest = blake3::hash(&self.0);
        digest.to_hex()[..8].to_string()
    }

    pub(crate) fn mac(&self, message: &[u8]) -> blake3::Hash {
        blake3::keyed_hash(&self.0, message)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKey").field(&self.key_id()).finish()
    }
}

/// Currently valid signing keys
///
/// Never mutated in place: rotation builds a new ring.
#[derive(Debug, Clone)]
pub struct KeyRing {
    current: SigningKey,
    previous: Option<RetiredKey>,
}

#[derive(Debug, Clone)]
struct RetiredKey {
    key: SigningKey,
    accepted_until: DateTime<Utc>,
}

impl KeyRing {
    /// Ring holding a single key
    #[must_use]
    pub fn new(current: SigningKey) -> Self {
        Self {
            current,
            previous: None,
        }
    }

    /// Key used to sign new tokens
    #[inline]
    #[must_use]
    pub fn current(&self) -> &SigningKey {
        &self.current
    }

    /// Until when the previous key is still accepted, if any
    #[must_use]
    pub fn grace_until(&self) -> Option<DateTime<Utc>> {
        self.previous.as_ref().map(|p| p.accepted_until)
    }

    /// New ring signing with `next`; the current key is accepted until
    /// `accepted_until`
    #[must_use]
    pub fn rotated(&self, next: SigningKey, accepted_until: DateTime<Utc>) -> Self {
        Self {
            current: next,
            previous: Some(RetiredKey {
                key: self.current.clone(),
                accepted_until,
            }),
        }
    }

    /// Keys accepted for verification at `now`
    pub(crate) fn verifying_keys(&self, now: DateTime<Utc>) -> impl Iterator<Item = &SigningKey> {
        let previous = self
            .previous
            .as_ref()
            .filter(|p| now < p.accepted_until)
            .map(|p| &p.key);
        std::iter::once(&self.current).chain(previous)
    }
}
