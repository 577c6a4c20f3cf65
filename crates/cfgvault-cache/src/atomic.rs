//! Write-then-rename helpers shared by every on-disk layout in this crate
//!
//! A write lands in `<tmp>/<stem>.<nonce>.partial`, is flushed and synced,
//! then renamed over the destination. Readers only ever observe complete
//! files; an interrupted write leaves a `.partial` file for [`sweep_partials`].

use crate::error::{CacheError, Result};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub(crate) const PARTIAL_SUFFIX: &str = ".partial";

/// Atomically write `bytes` to `dest`, staging under `tmp_dir`
pub(crate) async fn write_atomic(tmp_dir: &Path, stem: &str, dest: &Path, bytes: &[u8]) -> Result<()> {
    let nonce: u64 = rand::random();
    let tmp = tmp_dir.join(format!("{stem}.{nonce:016x}{PARTIAL_SUFFIX}"));

    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| CacheError::io(&tmp, e))?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(CacheError::io(&tmp, e));
    }

    if let Err(e) = fs::rename(&tmp, dest).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(CacheError::io(dest, e));
    }
    Ok(())
}

/// Delete leftover `.partial` files, returning how many were removed
pub(crate) async fn sweep_partials(tmp_dir: &Path) -> Result<u64> {
    let mut removed = 0;
    let mut entries = match fs::read_dir(tmp_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(CacheError::io(tmp_dir, e)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CacheError::io(tmp_dir, e))?
    {
        if entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX) {
            let path = entry.path();
            fs::remove_file(&path)
                .await
                .map_err(|e| CacheError::io(&path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Create a directory and its parents
pub(crate) async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| CacheError::io(path, e))
}

/// Read a file, mapping "not found" to `None`
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Remove a file, returning whether it existed
pub(crate) async fn remove_optional(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
