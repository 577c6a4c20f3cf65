//! cfgvault core
//!
//! The configuration artifact lifecycle and secure distribution engine:
//!
//! - [`DocumentRepository`]: durable versioned records
//!   ([`InMemoryRepository`], and `MongoRepository` behind the `mongo` feature)
//! - [`DistributionCoordinator`]: record edits, token issuance, downloads
//! - [`DistributionError`]: the error taxonomy every caller sees
//!
//! # Example
//!
//! ```rust,ignore
//! let saved = coordinator.create_record(&owner, fields).await?;
//! let issued = coordinator.issue_token(saved.id, None).await?;
//! let download = coordinator.download(&issued.token).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod repository;
pub mod singleflight;

#[cfg(feature = "mongo")]
pub mod mongo;

pub use config::{DistributionConfig, LogLevel};
pub use coordinator::{
    Download, DistributionCoordinator, DownloadState, IssuedToken, SavedRecord, MAX_PAGE_SIZE,
};
pub use error::{ConfigError, DistributionError, RepositoryError};
pub use repository::{DocumentRepository, InMemoryRepository, Page};

#[cfg(feature = "mongo")]
pub use mongo::MongoRepository;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
