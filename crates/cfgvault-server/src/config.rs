//! Command-line and environment configuration

use cfgvault_cache::CacheCapacity;
use cfgvault_core::{DistributionConfig, LogLevel};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// cfgvault daemon settings
///
/// Every flag falls back to an environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "cfgvault", version, about = "Versioned configuration artifacts behind signed download tokens")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "CFGVAULT_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection string; records are kept in memory when unset
    #[arg(long, env = "MONGODB_URI", hide_env_values = true)]
    pub mongodb_uri: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DATABASE", default_value = "cfgvault")]
    pub mongodb_database: String,

    /// Default log level (RUST_LOG overrides)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Artifact cache root
    #[arg(long, env = "CACHES_DIR", default_value = "/app/cache")]
    pub cache_dir: PathBuf,

    /// Directory for uploaded files
    #[arg(long, env = "LOCAL_FILE_DIR", default_value = "/app/local")]
    pub local_file_dir: PathBuf,

    /// Secret the token signing key is derived from; a random key is used when unset
    #[arg(long, env = "DOWNLOAD_SECURE_KEY", hide_env_values = true)]
    pub download_secret: Option<String>,

    /// Rotate the signing key on this period (at least the maximum token ttl)
    #[arg(long, env = "KEY_ROTATION_SECS")]
    pub key_rotation_secs: Option<u64>,

    /// Upper bound on token lifetime
    #[arg(long, env = "MAX_TOKEN_TTL_SECS", default_value_t = 86_400)]
    pub max_token_ttl_secs: u64,

    /// Token lifetime when the caller does not ask for one
    #[arg(long, env = "DEFAULT_TOKEN_TTL_SECS", default_value_t = 3_600)]
    pub default_token_ttl_secs: u64,

    /// Cache entry ceiling (0 for none)
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value_t = 1_024)]
    pub cache_max_entries: usize,

    /// Cache byte ceiling (0 for none)
    #[arg(long, env = "CACHE_MAX_BYTES", default_value_t = 268_435_456)]
    pub cache_max_bytes: u64,

    /// In-memory hot tier size in bytes (0 disables it)
    #[arg(long, env = "HOT_CACHE_BYTES", default_value_t = 16_777_216)]
    pub hot_cache_bytes: u64,

    /// Materialize every saved version immediately
    #[arg(long, env = "EAGER_MATERIALIZE")]
    pub eager_materialize: bool,
}

impl Args {
    /// Engine settings carried by these arguments
    #[must_use]
    pub fn distribution_config(&self) -> DistributionConfig {
        DistributionConfig::new()
            .with_default_token_ttl(Duration::from_secs(self.default_token_ttl_secs))
            .with_max_token_ttl(Duration::from_secs(self.max_token_ttl_secs))
            .with_cache_capacity(CacheCapacity {
                max_entries: (self.cache_max_entries > 0).then_some(self.cache_max_entries),
                max_bytes: (self.cache_max_bytes > 0).then_some(self.cache_max_bytes),
            })
            .with_hot_cache_bytes(self.hot_cache_bytes)
            .with_eager_materialize(self.eager_materialize)
            .with_key_rotation(self.key_rotation())
            .with_log_level(self.log_level)
    }

    /// Key rotation period, if rotation is enabled
    #[must_use]
    pub fn key_rotation(&self) -> Option<Duration> {
        self.key_rotation_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "cfgvault",
            "--listen",
            "127.0.0.1:9000",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--cache-max-entries",
            "0",
            "--hot-cache-bytes",
            "0",
            "--eager-materialize",
            "--key-rotation-secs",
            "86400",
        ])
        .unwrap();

        assert_eq!(args.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(args.log_format, LogFormat::Json);
        assert_eq!(args.key_rotation(), Some(Duration::from_secs(86_400)));

        let config = args.distribution_config();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.cache_max_entries, None);
        assert_eq!(config.hot_cache_bytes, 0);
        assert!(config.eager_materialize);
        assert_eq!(config.key_rotation(), Some(Duration::from_secs(86_400)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rotation_faster_than_token_lifetime_fails_validation() {
        let args = Args::try_parse_from(["cfgvault", "--key-rotation-secs", "600"]).unwrap();
        assert!(args.distribution_config().validate().is_err());
    }

    #[test]
    fn zero_rotation_period_disables_rotation() {
        let args =
            Args::try_parse_from(["cfgvault", "--key-rotation-secs", "0"]).unwrap();
        assert_eq!(args.key_rotation(), None);
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        assert!(Args::try_parse_from(["cfgvault", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn default_ttl_above_max_fails_validation() {
        let args = Args::try_parse_from([
            "cfgvault",
            "--max-token-ttl-secs",
            "60",
            "--default-token-ttl-secs",
            "120",
        ])
        .unwrap();
        assert!(args.distribution_config().validate().is_err());
    }
}
