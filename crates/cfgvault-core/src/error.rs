//! Error types for cfgvault core
//!
//! [`DistributionError`] is the taxonomy every caller sees. Crate-level
//! errors convert into it with `From`.

use cfgvault_artifact::{Fingerprint, MaterializationError, RecordId};
use cfgvault_cache::CacheError;
use cfgvault_token::TokenError;

/// Main distribution error type
///
/// `Clone` so a single regeneration result can be shared by every
/// concurrent waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DistributionError {
    /// Record, provenance or file does not exist (or was deleted)
    #[error("not found: {0}")]
    NotFound(String),

    /// Record content does not conform to the schema
    #[error("materialization failed: {0}")]
    Materialization(#[from] MaterializationError),

    /// Stored or regenerated bytes do not match the requested fingerprint
    #[error("cache integrity violation for {0}")]
    CacheIntegrity(Fingerprint),

    /// Token malformed, forged or expired
    #[error("download token is invalid or expired")]
    TokenInvalid,

    /// Repository or local storage failure
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// Malformed request (bad id, bad ttl, missing header)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DistributionError {
    /// Create not-found error for a record
    #[inline]
    pub fn record_not_found(id: RecordId) -> Self {
        Self::NotFound(format!("record {id}"))
    }

    /// Stable machine-readable code
    #[inline]
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Materialization(_) => "materialization_failed",
            Self::CacheIntegrity(_) => "internal_error",
            Self::TokenInvalid => "token_invalid",
            Self::Storage(_) => "storage_unavailable",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<TokenError> for DistributionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => Self::TokenInvalid,
            TokenError::InvalidTtl => Self::InvalidRequest(err.to_string()),
        }
    }
}

impl From<CacheError> for DistributionError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Integrity { fingerprint } => Self::CacheIntegrity(fingerprint),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Document repository errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// Record does not exist or was soft-deleted
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// Concurrent writers kept winning the optimistic race
    #[error("record {id} is contended, gave up after {attempts} attempts")]
    Conflict { id: RecordId, attempts: u32 },

    /// Backend failure
    #[error("repository backend error: {0}")]
    Backend(String),
}

impl From<RepositoryError> for DistributionError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::record_not_found(id),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A setting is out of range
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    /// Log level name not recognised
    #[error("unknown log level '{0}', expected error|warn|info|debug|trace")]
    UnknownLogLevel(String),
}
