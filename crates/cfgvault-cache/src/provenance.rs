//! Persistent fingerprint → (record, version) index
//!
//! Kept apart from artifact bytes so a fingerprint can be regenerated after
//! its artifact was evicted or the process restarted.

use crate::atomic::{ensure_dir, read_optional, write_atomic};
use crate::error::{CacheError, Result};
use cfgvault_artifact::{Fingerprint, RecordId, Version};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

const PROVENANCE_DIR: &str = "provenance";

/// Where an artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Source record
    pub record_id: RecordId,
    /// Source version
    pub version: Version,
}

impl Provenance {
    /// Create provenance entry
    #[inline]
    #[must_use]
    pub fn new(record_id: RecordId, version: Version) -> Self {
        Self { record_id, version }
    }
}

/// One JSON file per fingerprint under `<root>/provenance`, with a
/// read-through in-memory map
#[derive(Debug)]
pub struct ProvenanceIndex {
    dir: PathBuf,
    tmp: PathBuf,
    known: RwLock<HashMap<Fingerprint, Provenance>>,
}

impl ProvenanceIndex {
    /// Open (or create) the index under the cache root
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] if the directory cannot be created
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let dir = root.join(PROVENANCE_DIR);
        let tmp = root.join("tmp");
        ensure_dir(&dir).await?;
        ensure_dir(&tmp).await?;
        Ok(Self {
            dir,
            tmp,
            known: RwLock::new(HashMap::new()),
        })
    }

    fn path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    /// Record where `fingerprint` came from
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] if the entry cannot be persisted
    pub async fn record(&self, fingerprint: Fingerprint, provenance: Provenance) -> Result<()> {
        if self.known.read().get(&fingerprint) == Some(&provenance) {
            return Ok(());
        }
        let path = self.path(&fingerprint);
        let json = serde_json::to_vec(&provenance).map_err(|e| CacheError::corrupt(&path, e))?;
        let stem = format!("prov-{fingerprint}");
        write_atomic(&self.tmp, &stem, &path, &json).await?;
        self.known.write().insert(fingerprint, provenance);
        debug!(
            fingerprint = %fingerprint.short(),
            record = %provenance.record_id,
            version = %provenance.version,
            "provenance recorded"
        );
        Ok(())
    }

    /// Look up where `fingerprint` came from
    ///
    /// # Errors
    /// - [`CacheError::Io`] if the entry cannot be read
    /// - [`CacheError::Corrupt`] if the entry is not valid JSON
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Provenance>> {
        if let Some(found) = self.known.read().get(fingerprint) {
            return Ok(Some(*found));
        }
        let path = self.path(fingerprint);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        let provenance: Provenance =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::corrupt(&path, e))?;
        self.known.write().insert(*fingerprint, provenance);
        Ok(Some(provenance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_returns_recorded_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let index = ProvenanceIndex::open(dir.path()).await.unwrap();
        let fp = Fingerprint::new([7; 32]);
        let prov = Provenance::new(RecordId::new(), Version(3));

        assert!(index.lookup(&fp).await.unwrap().is_none());
        index.record(fp, prov).await.unwrap();
        assert_eq!(index.lookup(&fp).await.unwrap(), Some(prov));
    }

    #[tokio::test]
    async fn provenance_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let fp = Fingerprint::new([9; 32]);
        let prov = Provenance::new(RecordId::new(), Version(1));
        {
            let index = ProvenanceIndex::open(dir.path()).await.unwrap();
            index.record(fp, prov).await.unwrap();
        }
        let reopened = ProvenanceIndex::open(dir.path()).await.unwrap();
        assert_eq!(reopened.lookup(&fp).await.unwrap(), Some(prov));
    }

    #[tokio::test]
    async fn corrupt_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let index = ProvenanceIndex::open(dir.path()).await.unwrap();
        let fp = Fingerprint::new([1; 32]);
        tokio::fs::write(index.path(&fp), b"not json").await.unwrap();
        assert!(matches!(
            index.lookup(&fp).await,
            Err(CacheError::Corrupt { .. })
        ));
    }
}
