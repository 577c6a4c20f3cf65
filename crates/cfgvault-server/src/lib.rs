//! # cfgvault-server
//!
//! HTTP surface over [`cfgvault_core::DistributionCoordinator`]:
//! record editing, token export, token redemption and file uploads.
//!
//! The `cfgvault` binary wires configuration, tracing and storage
//! backends around [`routes::router`].

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{Args, LogFormat};
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
