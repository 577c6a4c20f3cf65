//! Durable versioned storage of configuration records

use crate::error::RepositoryError;
use async_trait::async_trait;
use cfgvault_artifact::{
    Clock, ConfigurationRecord, FieldEdit, OwnerRef, RecordId, SystemClock, Version,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Items skipped before this page
    pub offset: u64,
    /// Requested page size
    pub limit: u64,
    /// Items across all pages
    pub total: u64,
}

impl<T> Page<T> {
    /// Number of pages of `limit` items
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            0
        } else {
            self.total.div_ceil(self.limit)
        }
    }

    /// Convert every item, keeping the paging fields
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            offset: self.offset,
            limit: self.limit,
            total: self.total,
        }
    }
}

/// Versioned record storage
///
/// Saves on one record are serialized: each save bumps the version by
/// exactly one, atomically with the content change. Soft-deleted records
/// are `NotFound` for [`save`](Self::save) and
/// [`current_version`](Self::current_version); [`load`](Self::load) still
/// returns them with `deleted_at` set.
#[async_trait]
pub trait DocumentRepository: Send + Sync + Debug {
    /// Load a record, including soft-deleted ones
    async fn load(&self, id: RecordId) -> Result<ConfigurationRecord, RepositoryError>;

    /// Append `edits` as a new revision, creating the record at version 1
    /// when `id` is unknown
    async fn save(
        &self,
        id: RecordId,
        owner: &OwnerRef,
        edits: Vec<FieldEdit>,
    ) -> Result<Version, RepositoryError>;

    /// Current version of a live record
    async fn current_version(&self, id: RecordId) -> Result<Version, RepositoryError>;

    /// Mark a record deleted; it is never physically removed
    async fn soft_delete(&self, id: RecordId) -> Result<(), RepositoryError>;

    /// Live records ordered by creation time, then id
    async fn list(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Page<ConfigurationRecord>, RepositoryError>;

    /// Create a record under a fresh id
    async fn create(
        &self,
        owner: &OwnerRef,
        edits: Vec<FieldEdit>,
    ) -> Result<RecordId, RepositoryError> {
        let id = RecordId::new();
        self.save(id, owner, edits).await?;
        Ok(id)
    }
}

/// In-process repository
///
/// Per-key entry locking of the map serializes saves on one record.
#[derive(Debug)]
pub struct InMemoryRepository {
    records: DashMap<RecordId, ConfigurationRecord>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRepository {
    /// Create empty repository
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for record timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of stored records, deleted ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record was ever saved
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentRepository for InMemoryRepository {
    async fn load(&self, id: RecordId) -> Result<ConfigurationRecord, RepositoryError> {
        self.records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn save(
        &self,
        id: RecordId,
        owner: &OwnerRef,
        edits: Vec<FieldEdit>,
    ) -> Result<Version, RepositoryError> {
        let now = self.clock.now();
        let version = match self.records.entry(id) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_deleted() {
                    return Err(RepositoryError::NotFound(id));
                }
                entry.get_mut().apply(edits, now)
            }
            Entry::Vacant(entry) => {
                entry.insert(ConfigurationRecord::create(id, owner.clone(), edits, now));
                Version::INITIAL
            }
        };
        debug!(record = %id, %version, "record saved");
        Ok(version)
    }

    async fn current_version(&self, id: RecordId) -> Result<Version, RepositoryError> {
        match self.records.get(&id) {
            Some(record) if !record.is_deleted() => Ok(record.version),
            _ => Err(RepositoryError::NotFound(id)),
        }
    }

    async fn soft_delete(&self, id: RecordId) -> Result<(), RepositoryError> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound(id))?;
        if record.is_deleted() {
            return Err(RepositoryError::NotFound(id));
        }
        record.deleted_at = Some(self.clock.now());
        debug!(record = %id, "record soft-deleted");
        Ok(())
    }

    async fn list(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Page<ConfigurationRecord>, RepositoryError> {
        let mut live: Vec<ConfigurationRecord> = self
            .records
            .iter()
            .filter(|r| !r.is_deleted())
            .map(|r| r.value().clone())
            .collect();
        live.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        let total = live.len() as u64;
        let items = live
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();
        Ok(Page {
            items,
            offset,
            limit,
            total,
        })
    }
}
