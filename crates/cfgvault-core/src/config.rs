//! Distribution configuration

use crate::error::ConfigError;
use cfgvault_cache::CacheCapacity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only
    Error,
    /// Warnings and errors
    Warn,
    /// Lifecycle events
    #[default]
    Info,
    /// State transitions
    Debug,
    /// Everything
    Trace,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(ConfigError::UnknownLogLevel(s.to_owned())),
        }
    }
}

/// Settings of the distribution engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Token lifetime when the caller does not ask for one
    pub default_token_ttl_secs: u64,
    /// Upper bound on token lifetime; also the key-rotation grace period
    pub max_token_ttl_secs: u64,
    /// Cache entry ceiling
    pub cache_max_entries: Option<usize>,
    /// Cache byte ceiling
    pub cache_max_bytes: Option<u64>,
    /// In-memory hot tier size in bytes (0 disables it)
    pub hot_cache_bytes: u64,
    /// Signing key rotation period; at least `max_token_ttl_secs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_rotation_secs: Option<u64>,
    /// Materialize and cache every saved version immediately
    pub eager_materialize: bool,
    /// Log verbosity
    pub log_level: LogLevel,
}

impl DistributionConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With default token ttl
    #[inline]
    #[must_use]
    pub fn with_default_token_ttl(mut self, ttl: Duration) -> Self {
        self.default_token_ttl_secs = ttl.as_secs();
        self
    }

    /// With maximum token ttl
    #[inline]
    #[must_use]
    pub fn with_max_token_ttl(mut self, ttl: Duration) -> Self {
        self.max_token_ttl_secs = ttl.as_secs();
        self
    }

    /// With cache ceilings
    #[inline]
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: CacheCapacity) -> Self {
        self.cache_max_entries = capacity.max_entries;
        self.cache_max_bytes = capacity.max_bytes;
        self
    }

    /// With hot tier size
    #[inline]
    #[must_use]
    pub fn with_hot_cache_bytes(mut self, bytes: u64) -> Self {
        self.hot_cache_bytes = bytes;
        self
    }

    /// With eager materialization
    #[inline]
    #[must_use]
    pub fn with_eager_materialize(mut self, eager: bool) -> Self {
        self.eager_materialize = eager;
        self
    }

    /// With periodic key rotation
    #[inline]
    #[must_use]
    pub fn with_key_rotation(mut self, period: Option<Duration>) -> Self {
        self.key_rotation_secs = period.map(|p| p.as_secs());
        self
    }

    /// With log level
    #[inline]
    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Default token ttl
    #[inline]
    #[must_use]
    pub fn default_token_ttl(&self) -> Duration {
        Duration::from_secs(self.default_token_ttl_secs)
    }

    /// Maximum token ttl
    #[inline]
    #[must_use]
    pub fn max_token_ttl(&self) -> Duration {
        Duration::from_secs(self.max_token_ttl_secs)
    }

    /// Key rotation period, if rotation is enabled
    #[inline]
    #[must_use]
    pub fn key_rotation(&self) -> Option<Duration> {
        self.key_rotation_secs.map(Duration::from_secs)
    }

    /// Cache ceilings
    #[inline]
    #[must_use]
    pub fn cache_capacity(&self) -> CacheCapacity {
        CacheCapacity {
            max_entries: self.cache_max_entries,
            max_bytes: self.cache_max_bytes,
        }
    }

    /// Check settings for consistency
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_token_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "max_token_ttl_secs",
                reason: "must be positive".into(),
            });
        }
        if self.default_token_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "default_token_ttl_secs",
                reason: "must be positive".into(),
            });
        }
        if self.default_token_ttl_secs > self.max_token_ttl_secs {
            return Err(ConfigError::Invalid {
                name: "default_token_ttl_secs",
                reason: format!("exceeds max_token_ttl_secs ({})", self.max_token_ttl_secs),
            });
        }
        // the ring keeps one retired key, so a key must outlive every token it signed
        if let Some(period) = self.key_rotation_secs {
            if period < self.max_token_ttl_secs {
                return Err(ConfigError::Invalid {
                    name: "key_rotation_secs",
                    reason: format!(
                        "must be at least max_token_ttl_secs ({})",
                        self.max_token_ttl_secs
                    ),
                });
            }
        }
        if self.cache_max_entries == Some(0) {
            return Err(ConfigError::Invalid {
                name: "cache_max_entries",
                reason: "must be positive when set".into(),
            });
        }
        if self.cache_max_bytes == Some(0) {
            return Err(ConfigError::Invalid {
                name: "cache_max_bytes",
                reason: "must be positive when set".into(),
            });
        }
        Ok(())
    }
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            default_token_ttl_secs: 3600,
            max_token_ttl_secs: 86_400,
            cache_max_entries: Some(1024),
            cache_max_bytes: Some(256 * 1024 * 1024),
            hot_cache_bytes: 16 * 1024 * 1024,
            eager_materialize: false,
            key_rotation_secs: None,
            log_level: LogLevel::Info,
        }
    }
}
