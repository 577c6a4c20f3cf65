//! cfgvault artifacts
//!
//! Versioned configuration records and their deterministic,
//! content-addressed materialization.
//!
//! # Core Concepts
//!
//! - [`ConfigurationRecord`]: durable record with an append-only revision log
//! - [`Materializer`]: turns a record version into an immutable [`Artifact`]
//! - [`Fingerprint`]: SHA-256 over record id, version and canonical payload
//! - [`Clock`]: time source shared by token expiry and cache pins
//!
//! # Example
//!
//! ```rust,ignore
//! use cfgvault_artifact::{ConfigurationRecord, Materialize, Materializer, Version};
//!
//! let artifact = Materializer.materialize(&record, Version(1))?;
//! println!("{} -> {}", artifact.file_name(), artifact.fingerprint());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod clock;
mod hash;
mod record;

pub mod canonical;
pub mod schema;

pub use artifact::{
    artifact_file_name, Artifact, MaterializationError, Materialize, Materializer,
    ARTIFACT_CONTENT_TYPE, FORMAT_VERSION,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use hash::{Fingerprint, HashError};
pub use record::{ConfigurationRecord, FieldEdit, OwnerRef, RecordId, Revision, Version};
pub use schema::{validate_agent_config, SchemaViolation};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
