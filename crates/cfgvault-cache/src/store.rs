//! Fingerprint-addressed artifact cache on local storage
//!
//! Layout under the cache root:
//!
//! ```text
//! objects/<fingerprint>.artifact   complete artifact bytes
//! tmp/<fingerprint>.<nonce>.partial   in-flight writes
//! ```
//!
//! The in-memory index is the source of truth for recency and pins; it is
//! rebuilt from `objects/` on [`CacheStore::open`]. The index mutex is never
//! held across an `.await`. Writes and evictions of one fingerprint are
//! serialized by a per-fingerprint async lock, so the file on disk and the
//! index entry always change together.

use crate::atomic::{ensure_dir, read_optional, remove_optional, sweep_partials, write_atomic};
use crate::error::Result;
use crate::CacheError;
use bytes::Bytes;
use cfgvault_artifact::{Clock, Fingerprint, SystemClock};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";
const OBJECT_EXT: &str = "artifact";

/// Callback told about every evicted fingerprint
pub type EvictionListener = Arc<dyn Fn(Fingerprint) + Send + Sync>;

/// Capacity ceilings; `None` means unbounded on that axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCapacity {
    /// Maximum number of cached artifacts
    pub max_entries: Option<usize>,
    /// Maximum total payload bytes
    pub max_bytes: Option<u64>,
}

impl CacheCapacity {
    /// No ceilings
    pub const UNBOUNDED: Self = Self {
        max_entries: None,
        max_bytes: None,
    };

    /// Limit by entry count only
    #[inline]
    #[must_use]
    pub const fn entries(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            max_bytes: None,
        }
    }

    /// Limit by total bytes only
    #[inline]
    #[must_use]
    pub const fn bytes(max_bytes: u64) -> Self {
        Self {
            max_entries: None,
            max_bytes: Some(max_bytes),
        }
    }

    fn exceeded_by(&self, entries: usize, bytes: u64) -> bool {
        self.max_entries.is_some_and(|max| entries > max)
            || self.max_bytes.is_some_and(|max| bytes > max)
    }
}

impl Default for CacheCapacity {
    fn default() -> Self {
        Self {
            max_entries: Some(1024),
            max_bytes: Some(256 * 1024 * 1024),
        }
    }
}

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: usize,
    /// Sum of cached payload sizes
    pub total_bytes: u64,
    /// Entries currently protected by an unexpired pin
    pub pinned_count: usize,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    size: u64,
    last_access: u64,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<Fingerprint, Entry>,
    pins: HashMap<Fingerprint, Vec<DateTime<Utc>>>,
    writers: HashMap<Fingerprint, Arc<AsyncMutex<()>>>,
    total_bytes: u64,
    tick: u64,
}

impl Index {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn insert(&mut self, fingerprint: Fingerprint, size: u64) {
        let tick = self.next_tick();
        if let Some(old) = self.entries.insert(
            fingerprint,
            Entry {
                size,
                last_access: tick,
            },
        ) {
            self.total_bytes -= old.size;
        }
        self.total_bytes += size;
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<Entry> {
        let entry = self.entries.remove(fingerprint)?;
        self.total_bytes -= entry.size;
        Some(entry)
    }

    fn touch(&mut self, fingerprint: &Fingerprint) -> bool {
        let tick = self.next_tick();
        match self.entries.get_mut(fingerprint) {
            Some(entry) => {
                entry.last_access = tick;
                true
            }
            None => false,
        }
    }

    /// Drop expired pins and return the number still active for `fingerprint`
    fn active_pins(&mut self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> usize {
        let Some(pins) = self.pins.get_mut(fingerprint) else {
            return 0;
        };
        pins.retain(|until| *until > now);
        let count = pins.len();
        if count == 0 {
            self.pins.remove(fingerprint);
        }
        count
    }

    fn prune_pins(&mut self, now: DateTime<Utc>) {
        self.pins.retain(|_, pins| {
            pins.retain(|until| *until > now);
            !pins.is_empty()
        });
    }
}

/// Exclusive right to change one fingerprint's file and entry
struct WriteSlot<'a> {
    store: &'a CacheStore,
    fingerprint: Fingerprint,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for WriteSlot<'_> {
    fn drop(&mut self) {
        let mut index = self.store.index.lock();
        self.guard.take();
        if index
            .writers
            .get(&self.fingerprint)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            index.writers.remove(&self.fingerprint);
        }
    }
}

/// Local-storage artifact cache with LRU eviction and pinning
pub struct CacheStore {
    root: PathBuf,
    capacity: CacheCapacity,
    clock: Arc<dyn Clock>,
    listener: Option<EvictionListener>,
    index: Mutex<Index>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.root)
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Open (or create) a cache rooted at `root`
    ///
    /// Sweeps leftover `.partial` files and rebuilds the index from the
    /// objects directory, oldest modification time first.
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] if the layout cannot be created or scanned
    pub async fn open(root: impl Into<PathBuf>, capacity: CacheCapacity) -> Result<Self> {
        let root = root.into();
        let objects = root.join(OBJECTS_DIR);
        let tmp = root.join(TMP_DIR);
        ensure_dir(&objects).await?;
        ensure_dir(&tmp).await?;

        let swept = sweep_partials(&tmp).await?;
        if swept > 0 {
            info!(swept, root = %root.display(), "removed interrupted cache writes");
        }

        let mut found = Vec::new();
        let mut dir = tokio::fs::read_dir(&objects)
            .await
            .map_err(|e| CacheError::io(&objects, e))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&objects, e))?
        {
            let path = entry.path();
            let Some(fingerprint) = parse_object_name(&path) else {
                debug!(path = %path.display(), "ignoring foreign file in cache");
                continue;
            };
            let meta = entry
                .metadata()
                .await
                .map_err(|e| CacheError::io(&path, e))?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, fingerprint, meta.len()));
        }
        found.sort_by_key(|(modified, _, _)| *modified);

        let mut index = Index::default();
        for (_, fingerprint, size) in found {
            index.insert(fingerprint, size);
        }
        info!(
            root = %root.display(),
            entries = index.entries.len(),
            bytes = index.total_bytes,
            "cache store opened"
        );

        Ok(Self {
            root,
            capacity,
            clock: Arc::new(SystemClock),
            listener: None,
            index: Mutex::new(index),
        })
    }

    /// Use `clock` for pin expiry
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register the eviction listener
    #[must_use]
    pub fn with_eviction_listener(mut self, listener: EvictionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Cache root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configured ceilings
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> CacheCapacity {
        self.capacity
    }

    /// Path of the object file for `fingerprint`
    #[must_use]
    pub fn object_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(OBJECTS_DIR)
            .join(format!("{fingerprint}.{OBJECT_EXT}"))
    }

    async fn lock_fingerprint(&self, fingerprint: Fingerprint) -> WriteSlot<'_> {
        let slot = self
            .index
            .lock()
            .writers
            .entry(fingerprint)
            .or_default()
            .clone();
        WriteSlot {
            store: self,
            fingerprint,
            guard: Some(slot.lock_owned().await),
        }
    }

    /// Store `bytes` under `fingerprint`
    ///
    /// Idempotent for identical bytes (refreshes recency). Concurrent puts
    /// of one fingerprint are serialized, so when they carry different
    /// bytes exactly one succeeds. Runs [`Self::evict_if_needed`] afterwards.
    ///
    /// # Errors
    /// - [`CacheError::Integrity`] if different bytes are already stored
    /// - [`CacheError::Io`] if the write fails
    pub async fn put(&self, fingerprint: Fingerprint, bytes: &[u8]) -> Result<()> {
        {
            let _slot = self.lock_fingerprint(fingerprint).await;
            let path = self.object_path(&fingerprint);
            let known = self.index.lock().entries.contains_key(&fingerprint);

            if known {
                match read_optional(&path).await? {
                    Some(existing) if existing == bytes => {
                        self.index.lock().touch(&fingerprint);
                        debug!(fingerprint = %fingerprint.short(), "cache put hit");
                        return Ok(());
                    }
                    Some(_) => return Err(CacheError::Integrity { fingerprint }),
                    None => {
                        debug!(fingerprint = %fingerprint.short(), "cache entry lost its file, rewriting");
                    }
                }
            }

            let stem = fingerprint.to_string();
            write_atomic(&self.root.join(TMP_DIR), &stem, &path, bytes).await?;
            self.index.lock().insert(fingerprint, bytes.len() as u64);
            debug!(fingerprint = %fingerprint.short(), size = bytes.len(), "cache put");
        }

        self.evict_if_needed().await;
        Ok(())
    }

    /// Fetch the bytes for `fingerprint`; never regenerates
    ///
    /// A missing file drops the stale entry and reports a miss.
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] for read failures other than "not found"
    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Bytes>> {
        if !self.index.lock().entries.contains_key(fingerprint) {
            return Ok(None);
        }
        match read_optional(&self.object_path(fingerprint)).await? {
            Some(bytes) => {
                self.index.lock().touch(fingerprint);
                Ok(Some(Bytes::from(bytes)))
            }
            None => {
                self.index.lock().remove(fingerprint);
                debug!(fingerprint = %fingerprint.short(), "stale cache entry dropped");
                Ok(None)
            }
        }
    }

    /// Whether `fingerprint` is indexed
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.lock().entries.contains_key(fingerprint)
    }

    /// Refresh recency without reading the file; returns whether it was present
    pub fn touch(&self, fingerprint: &Fingerprint) -> bool {
        self.index.lock().touch(fingerprint)
    }

    /// Protect `fingerprint` from eviction until `until`
    ///
    /// May be called before the entry exists.
    pub fn pin(&self, fingerprint: Fingerprint, until: DateTime<Utc>) {
        let now = self.clock.now();
        if until <= now {
            return;
        }
        let mut index = self.index.lock();
        let pins = index.pins.entry(fingerprint).or_default();
        pins.retain(|pinned| *pinned > now);
        pins.push(until);
        debug!(fingerprint = %fingerprint.short(), %until, "cache pin");
    }

    /// Number of unexpired pins on `fingerprint`
    #[must_use]
    pub fn pin_count(&self, fingerprint: &Fingerprint) -> usize {
        let now = self.clock.now();
        self.index.lock().active_pins(fingerprint, now)
    }

    /// Evict least-recently-used unpinned entries until within capacity
    ///
    /// Returns the evicted fingerprints. If only pinned entries remain the
    /// store stays over capacity. A victim stored again by a concurrent
    /// [`Self::put`] before its file is deleted keeps its file and is not
    /// reported.
    pub async fn evict_if_needed(&self) -> Vec<Fingerprint> {
        let now = self.clock.now();
        let (victims, over) = {
            let mut index = self.index.lock();
            if !self
                .capacity
                .exceeded_by(index.entries.len(), index.total_bytes)
            {
                return Vec::new();
            }
            index.prune_pins(now);

            let mut candidates: Vec<_> = index
                .entries
                .iter()
                .filter(|(fp, _)| !index.pins.contains_key(*fp))
                .map(|(fp, entry)| (entry.last_access, *fp))
                .collect();
            candidates.sort_unstable();

            let mut victims = Vec::new();
            for (_, fingerprint) in candidates {
                if !self
                    .capacity
                    .exceeded_by(index.entries.len(), index.total_bytes)
                {
                    break;
                }
                index.remove(&fingerprint);
                victims.push(fingerprint);
            }
            let over = self
                .capacity
                .exceeded_by(index.entries.len(), index.total_bytes);
            (victims, over)
        };

        let mut evicted = Vec::with_capacity(victims.len());
        for fingerprint in victims {
            let _slot = self.lock_fingerprint(fingerprint).await;
            if self.index.lock().entries.contains_key(&fingerprint) {
                debug!(fingerprint = %fingerprint.short(), "evicted entry stored again, keeping file");
                continue;
            }
            let path = self.object_path(&fingerprint);
            if let Err(e) = remove_optional(&path).await {
                warn!(fingerprint = %fingerprint.short(), error = %e, "failed to delete evicted artifact");
            }
            debug!(fingerprint = %fingerprint.short(), "cache evict");
            if let Some(listener) = &self.listener {
                listener(fingerprint);
            }
            evicted.push(fingerprint);
        }

        if over {
            let stats = self.stats();
            warn!(
                entries = stats.entry_count,
                bytes = stats.total_bytes,
                pinned = stats.pinned_count,
                "cache over capacity with only pinned entries left"
            );
        }
        evicted
    }

    /// Current occupancy
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let mut index = self.index.lock();
        index.prune_pins(now);
        let pinned_count = index
            .entries
            .keys()
            .filter(|fp| index.pins.contains_key(*fp))
            .count();
        CacheStats {
            entry_count: index.entries.len(),
            total_bytes: index.total_bytes,
            pinned_count,
        }
    }
}

fn parse_object_name(path: &Path) -> Option<Fingerprint> {
    if path.extension()? != OBJECT_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}
