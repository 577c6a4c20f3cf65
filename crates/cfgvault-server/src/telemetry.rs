//! Tracing subscriber setup

use crate::config::LogFormat;
use cfgvault_core::LogLevel;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `level` is the default directive; `RUST_LOG` overrides it.
pub fn init(level: LogLevel, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
    }
}
