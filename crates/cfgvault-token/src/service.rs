//! Token issuance, verification and key rotation

use crate::error::{Rejection, TokenError};
use crate::key::{KeyRing, SigningKey};
use crate::token::DownloadToken;
use cfgvault_artifact::{Clock, Fingerprint, SystemClock};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default upper bound on token lifetime (24h)
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Issues and verifies download tokens
///
/// Verification is a pure function of the token, the key ring and the
/// clock, so it is cheap enough to run inline on any task.
#[derive(Debug)]
pub struct TokenService {
    keys: RwLock<Arc<KeyRing>>,
    clock: Arc<dyn Clock>,
    max_ttl: Duration,
}

impl TokenService {
    /// Create service signing with `key`
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        Self {
            keys: RwLock::new(Arc::new(KeyRing::new(key))),
            clock: Arc::new(SystemClock),
            max_ttl: DEFAULT_MAX_TTL,
        }
    }

    /// Use `clock` as the time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the maximum token lifetime (also the rotation grace period)
    #[must_use]
    pub fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = max_ttl;
        self
    }

    /// Maximum token lifetime
    #[inline]
    #[must_use]
    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Snapshot of the key ring
    #[must_use]
    pub fn key_ring(&self) -> Arc<KeyRing> {
        self.keys.read().clone()
    }

    /// Issue a token for `fingerprint` valid for `ttl` (clamped to the maximum)
    ///
    /// # Errors
    /// Returns [`TokenError::InvalidTtl`] if `ttl` is zero
    pub fn issue(&self, fingerprint: Fingerprint, ttl: Duration) -> Result<DownloadToken, TokenError> {
        if ttl.is_zero() {
            return Err(TokenError::InvalidTtl);
        }
        let ttl = ttl.min(self.max_ttl);
        let ttl_ms = i64::try_from(ttl.as_millis()).map_err(|_| TokenError::InvalidTtl)?;
        if ttl_ms == 0 {
            return Err(TokenError::InvalidTtl);
        }

        let issued_at_ms = self.clock.now().timestamp_millis();
        let expires_at_ms = issued_at_ms
            .checked_add(ttl_ms)
            .ok_or(TokenError::InvalidTtl)?;
        let nonce: [u8; 16] = rand::random();

        let ring = self.key_ring();
        let claims = DownloadToken::claims(fingerprint, issued_at_ms, expires_at_ms, nonce);
        let mac = ring.current().mac(&claims);

        debug!(
            fingerprint = %fingerprint.short(),
            ttl_ms,
            key = %ring.current().key_id(),
            "token issued"
        );
        Ok(DownloadToken::new(
            fingerprint,
            issued_at_ms,
            expires_at_ms,
            nonce,
            *mac.as_bytes(),
        ))
    }

    /// Verify `token` against the current time
    ///
    /// # Errors
    /// Returns [`TokenError::Invalid`] for any malformed, forged or expired token
    pub fn verify(&self, token: &str) -> Result<Fingerprint, TokenError> {
        self.verify_at(token, self.clock.now())
    }

    /// Verify `token` as of `now`
    ///
    /// # Errors
    /// Returns [`TokenError::Invalid`] for any malformed, forged or expired token
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Fingerprint, TokenError> {
        self.check(token, now).map_err(|reason| {
            debug!(reason = reason.as_str(), "token rejected");
            TokenError::Invalid
        })
    }

    fn check(&self, token: &str, now: DateTime<Utc>) -> Result<Fingerprint, Rejection> {
        let token = DownloadToken::decode(token)?;
        let claims = token.signed_claims();
        let presented = blake3::Hash::from(*token.mac());

        let ring = self.key_ring();
        // blake3::Hash equality is constant time
        if !ring.verifying_keys(now).any(|key| key.mac(&claims) == presented) {
            return Err(Rejection::Signature);
        }
        if now.timestamp_millis() >= token.expires_at_ms() {
            return Err(Rejection::Expired);
        }
        Ok(*token.fingerprint())
    }

    /// Switch to `next` for signing
    ///
    /// The previous key keeps verifying for one maximum token lifetime, so
    /// every token it signed can expire naturally. A key retired earlier is
    /// dropped.
    pub fn rotate(&self, next: SigningKey) {
        let grace = chrono::Duration::from_std(self.max_ttl).unwrap_or(chrono::Duration::MAX);
        let accepted_until = self
            .clock
            .now()
            .checked_add_signed(grace)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut keys = self.keys.write();
        let rotated = Arc::new(keys.rotated(next, accepted_until));
        info!(
            key = %rotated.current().key_id(),
            previous = %keys.current().key_id(),
            %accepted_until,
            "signing key rotated"
        );
        *keys = rotated;
    }
}

/// Rotate to a freshly generated key every `interval`
///
/// The first rotation happens one full interval after spawning. The ring
/// keeps a single retired key, so `interval` is raised to the maximum token
/// lifetime when shorter.
pub fn spawn_rotation(service: Arc<TokenService>, interval: Duration) -> JoinHandle<()> {
    let interval = if interval < service.max_ttl() {
        warn!(
            requested_secs = interval.as_secs(),
            max_ttl_secs = service.max_ttl().as_secs(),
            "rotation period shorter than max token ttl, using max ttl"
        );
        service.max_ttl()
    } else {
        interval
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            service.rotate(SigningKey::generate());
        }
    })
}
