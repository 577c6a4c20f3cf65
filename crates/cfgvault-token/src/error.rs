//! Token errors

/// Errors surfaced by the token service
///
/// Every verification failure is [`TokenError::Invalid`]; the concrete
/// reason is only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Token is malformed, forged, signed by a retired key, or expired
    #[error("download token is invalid or expired")]
    Invalid,

    /// Requested lifetime cannot be honoured
    #[error("token lifetime must be positive")]
    InvalidTtl,
}

/// Internal rejection reasons, logged at debug level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    Encoding,
    Length,
    FormatVersion,
    Signature,
    Expired,
}

impl Rejection {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Encoding => "not base64url",
            Self::Length => "wrong length",
            Self::FormatVersion => "unknown format version",
            Self::Signature => "signature mismatch",
            Self::Expired => "expired",
        }
    }
}
