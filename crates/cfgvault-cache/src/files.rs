//! Local source-file storage
//!
//! Uploaded files are stored as `<root>/<id>.bin` with a JSON metadata
//! sidecar `<root>/<id>.json`. Names supplied by clients are kept as
//! metadata only and never used as paths.

use crate::atomic::{ensure_dir, read_optional, remove_optional, sweep_partials, write_atomic};
use crate::error::{CacheError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

const TMP_DIR: &str = ".tmp";

/// Metadata of a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// File identity
    pub id: Uuid,
    /// Original client-supplied name
    pub name: String,
    /// MIME type
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
    /// Save timestamp
    pub saved_at: DateTime<Utc>,
}

/// Directory-backed file store
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Open (or create) the store rooted at `root`
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] if the directory cannot be created
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ensure_dir(&root.join(TMP_DIR)).await?;
        let swept = sweep_partials(&root.join(TMP_DIR)).await?;
        if swept > 0 {
            info!(swept, root = %root.display(), "removed interrupted uploads");
        }
        Ok(Self { root })
    }

    fn data_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.bin"))
    }

    fn meta_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Save `bytes` under a fresh id
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] if either file cannot be written
    pub async fn save(&self, name: &str, mime_type: &str, bytes: &[u8]) -> Result<StoredFile> {
        let id = Uuid::new_v4();
        let meta = StoredFile {
            id,
            name: name.to_owned(),
            mime_type: mime_type.to_owned(),
            size: bytes.len() as u64,
            saved_at: Utc::now(),
        };
        let tmp = self.root.join(TMP_DIR);
        let stem = id.to_string();
        write_atomic(&tmp, &stem, &self.data_path(id), bytes).await?;

        let meta_path = self.meta_path(id);
        let json = serde_json::to_vec(&meta).map_err(|e| CacheError::corrupt(&meta_path, e))?;
        write_atomic(&tmp, &stem, &meta_path, &json).await?;
        debug!(%id, size = meta.size, "file saved");
        Ok(meta)
    }

    /// Metadata for `id`
    ///
    /// # Errors
    /// Returns [`CacheError`] if the sidecar cannot be read or decoded
    pub async fn metadata(&self, id: Uuid) -> Result<Option<StoredFile>> {
        let path = self.meta_path(id);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::corrupt(&path, e))
    }

    /// File contents for `id`
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] if the file cannot be read
    pub async fn read(&self, id: Uuid) -> Result<Option<Bytes>> {
        Ok(read_optional(&self.data_path(id)).await?.map(Bytes::from))
    }

    /// Delete `id`; returns whether it existed
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] if removal fails
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let had_meta = remove_optional(&self.meta_path(id)).await?;
        let had_data = remove_optional(&self.data_path(id)).await?;
        if had_meta || had_data {
            debug!(%id, "file deleted");
        }
        Ok(had_meta || had_data)
    }
}
