//! Download token wire format
//!
//! ```text
//! base64url-nopad( 0x01 | fingerprint[32] | issued_at_ms i64 BE
//!                  | expires_at_ms i64 BE | nonce[16] | mac[32] )
//! ```
//!
//! The MAC covers every preceding byte.

use crate::error::Rejection;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use cfgvault_artifact::Fingerprint;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

/// Wire format version byte
pub const TOKEN_FORMAT_VERSION: u8 = 0x01;

const CLAIMS_LEN: usize = 1 + 32 + 8 + 8 + 16;
const MAC_LEN: usize = 32;

/// Raw token length before base64 encoding
pub const TOKEN_LEN: usize = CLAIMS_LEN + MAC_LEN;

/// A signed claim granting download of one artifact until `expires_at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadToken {
    fingerprint: Fingerprint,
    issued_at_ms: i64,
    expires_at_ms: i64,
    nonce: [u8; 16],
    mac: [u8; 32],
}

impl DownloadToken {
    pub(crate) fn claims(
        fingerprint: Fingerprint,
        issued_at_ms: i64,
        expires_at_ms: i64,
        nonce: [u8; 16],
    ) -> [u8; CLAIMS_LEN] {
        let mut out = [0u8; CLAIMS_LEN];
        out[0] = TOKEN_FORMAT_VERSION;
        out[1..33].copy_from_slice(fingerprint.as_bytes());
        out[33..41].copy_from_slice(&issued_at_ms.to_be_bytes());
        out[41..49].copy_from_slice(&expires_at_ms.to_be_bytes());
        out[49..65].copy_from_slice(&nonce);
        out
    }

    pub(crate) fn new(
        fingerprint: Fingerprint,
        issued_at_ms: i64,
        expires_at_ms: i64,
        nonce: [u8; 16],
        mac: [u8; 32],
    ) -> Self {
        Self {
            fingerprint,
            issued_at_ms,
            expires_at_ms,
            nonce,
            mac,
        }
    }

    /// Artifact this token grants access to
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Issue instant (millisecond precision)
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        millis_to_datetime(self.issued_at_ms)
    }

    /// Expiry instant (millisecond precision); the token is valid strictly before it
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        millis_to_datetime(self.expires_at_ms)
    }

    #[inline]
    pub(crate) fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms
    }

    #[inline]
    pub(crate) fn mac(&self) -> &[u8; 32] {
        &self.mac
    }

    pub(crate) fn signed_claims(&self) -> [u8; CLAIMS_LEN] {
        Self::claims(
            self.fingerprint,
            self.issued_at_ms,
            self.expires_at_ms,
            self.nonce,
        )
    }

    /// Raw bytes (before base64)
    #[must_use]
    pub fn to_bytes(&self) -> [u8; TOKEN_LEN] {
        let mut out = [0u8; TOKEN_LEN];
        out[..CLAIMS_LEN].copy_from_slice(&self.signed_claims());
        out[CLAIMS_LEN..].copy_from_slice(&self.mac);
        out
    }

    /// URL-safe string form
    #[must_use]
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// Parse the string form; does not check the MAC or expiry
    pub(crate) fn decode(s: &str) -> Result<Self, Rejection> {
        let raw = URL_SAFE_NO_PAD
            .decode(s.as_bytes())
            .map_err(|_| Rejection::Encoding)?;
        let raw: [u8; TOKEN_LEN] = raw.try_into().map_err(|_| Rejection::Length)?;
        if raw[0] != TOKEN_FORMAT_VERSION {
            return Err(Rejection::FormatVersion);
        }

        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(&raw[1..33]);
        let mut issued = [0u8; 8];
        issued.copy_from_slice(&raw[33..41]);
        let mut expires = [0u8; 8];
        expires.copy_from_slice(&raw[41..49]);
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&raw[49..65]);
        let mut mac = [0u8; 32];
        mac.copy_from_slice(&raw[CLAIMS_LEN..]);

        Ok(Self {
            fingerprint: Fingerprint::new(fingerprint),
            issued_at_ms: i64::from_be_bytes(issued),
            expires_at_ms: i64::from_be_bytes(expires),
            nonce,
            mac,
        })
    }
}

impl fmt::Display for DownloadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> DownloadToken {
        DownloadToken::new(Fingerprint::new([3; 32]), 1_000, 61_000, [5; 16], [9; 32])
    }

    #[test]
    fn encoded_length_is_fixed() {
        let encoded = sample().encode();
        // 97 bytes -> ceil(97 * 4 / 3) chars without padding
        assert_eq!(encoded.len(), 130);
        assert!(encoded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    }

    #[test]
    fn decode_inverts_encode() {
        let token = sample();
        assert_eq!(DownloadToken::decode(&token.encode()).unwrap(), token);
        assert_eq!(token.expires_at().timestamp_millis(), 61_000);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(DownloadToken::decode("***"), Err(Rejection::Encoding));
        assert_eq!(DownloadToken::decode("AAAA"), Err(Rejection::Length));

        let mut raw = sample().to_bytes();
        raw[0] = 0x02;
        assert_eq!(
            DownloadToken::decode(&URL_SAFE_NO_PAD.encode(raw)),
            Err(Rejection::FormatVersion)
        );
    }
}
