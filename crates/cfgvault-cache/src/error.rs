//! Error types for the cache crate

use cfgvault_artifact::Fingerprint;
use std::path::{Path, PathBuf};

/// Errors raised by the cache store, provenance index and file store
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Different bytes offered for an already stored fingerprint
    #[error("integrity violation: stored bytes for {fingerprint} differ from the new payload")]
    Integrity { fingerprint: Fingerprint },

    /// A metadata sidecar could not be decoded
    #[error("corrupt metadata at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl CacheError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create corrupt-metadata error for path
    pub fn corrupt(path: &Path, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Result alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
