//! cfgvault cache
//!
//! Local-storage persistence for materialized artifacts:
//!
//! - [`CacheStore`]: fingerprint → bytes, LRU eviction, pinning
//! - [`ProvenanceIndex`]: fingerprint → (record, version), never evicted
//! - [`LocalFileStore`]: uploaded source files with metadata sidecars
//!
//! Every write goes through a staged `.partial` file followed by a rename,
//! so readers never observe torn files.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod atomic;
mod error;
mod files;
mod provenance;
mod store;

pub use error::{CacheError, Result};
pub use files::{LocalFileStore, StoredFile};
pub use provenance::{Provenance, ProvenanceIndex};
pub use store::{CacheCapacity, CacheStats, CacheStore, EvictionListener};
