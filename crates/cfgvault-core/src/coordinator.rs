//! Distribution coordinator
//!
//! Ties the repository, materializer, cache, provenance index and token
//! service together. A download moves through [`DownloadState`]:
//!
//! ```text
//! Requested -> TokenValidated -> Resolved -> Served
//!     \-> Rejected       \-> Failed
//! ```
//!
//! Misses are regenerated from the source record under a per-fingerprint
//! single-flight, so concurrent downloads of one evicted artifact trigger
//! one materialization.

use crate::config::DistributionConfig;
use crate::error::DistributionError;
use crate::repository::{DocumentRepository, Page};
use crate::singleflight::SingleFlight;
use bytes::Bytes;
use cfgvault_artifact::{
    artifact_file_name, Artifact, ConfigurationRecord, FieldEdit, Fingerprint, Materialize,
    Materializer, OwnerRef, RecordId, Version, ARTIFACT_CONTENT_TYPE,
};
use cfgvault_cache::{CacheStats, CacheStore, Provenance, ProvenanceIndex};
use cfgvault_token::{SigningKey, TokenService};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Largest page [`DistributionCoordinator::list_records`] serves
pub const MAX_PAGE_SIZE: u64 = 100;

/// Stages of a download request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Token received
    Requested,
    /// Token signature and expiry checked
    TokenValidated,
    /// Bytes located (cache hit or regenerated)
    Resolved,
    /// Bytes handed to the caller
    Served,
    /// Token invalid or expired
    Rejected,
    /// Resolution failed
    Failed,
}

impl DownloadState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::TokenValidated => "token_validated",
            Self::Resolved => "resolved",
            Self::Served => "served",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

fn transition(state: DownloadState, fingerprint: Option<&Fingerprint>) {
    match fingerprint {
        Some(fp) => debug!(state = state.as_str(), fingerprint = %fp.short(), "download"),
        None => debug!(state = state.as_str(), "download"),
    }
}

/// Result of a successful save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SavedRecord {
    /// Record identity
    pub id: RecordId,
    /// Version produced by the save
    pub version: Version,
}

/// A token ready to hand to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    /// Encoded token
    pub token: String,
    /// Artifact the token grants
    pub fingerprint: Fingerprint,
    /// Source record
    pub record_id: RecordId,
    /// Source version
    pub version: Version,
    /// Validity end (exclusive)
    pub expires_at: DateTime<Utc>,
}

/// Artifact bytes plus delivery metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Canonical payload
    pub bytes: Bytes,
    /// MIME type
    pub content_type: &'static str,
    /// Suggested file name
    pub file_name: String,
    /// Artifact fingerprint
    pub fingerprint: Fingerprint,
}

/// Orchestrates record edits, token issuance and downloads
pub struct DistributionCoordinator {
    config: DistributionConfig,
    repository: Arc<dyn DocumentRepository>,
    materializer: Arc<dyn Materialize>,
    cache: Arc<CacheStore>,
    provenance: Arc<ProvenanceIndex>,
    tokens: Arc<TokenService>,
    hot: Option<Cache<Fingerprint, Bytes>>,
    flights: SingleFlight<Fingerprint, Result<Bytes, DistributionError>>,
}

impl fmt::Debug for DistributionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionCoordinator")
            .field("config", &self.config)
            .field("repository", &self.repository)
            .field("cache", &self.cache)
            .field("hot_tier", &self.hot.is_some())
            .finish_non_exhaustive()
    }
}

impl DistributionCoordinator {
    /// Create coordinator using the canonical [`Materializer`]
    #[must_use]
    pub fn new(
        config: DistributionConfig,
        repository: Arc<dyn DocumentRepository>,
        cache: Arc<CacheStore>,
        provenance: Arc<ProvenanceIndex>,
        tokens: Arc<TokenService>,
    ) -> Self {
        let hot = (config.hot_cache_bytes > 0).then(|| {
            Cache::builder()
                .max_capacity(config.hot_cache_bytes)
                .weigher(|_fp: &Fingerprint, bytes: &Bytes| {
                    u32::try_from(bytes.len()).unwrap_or(u32::MAX)
                })
                .build()
        });
        Self {
            config,
            repository,
            materializer: Arc::new(Materializer::new()),
            cache,
            provenance,
            tokens,
            hot,
            flights: SingleFlight::new(),
        }
    }

    /// Replace the materializer
    #[must_use]
    pub fn with_materializer(mut self, materializer: Arc<dyn Materialize>) -> Self {
        self.materializer = materializer;
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Token service in use
    #[inline]
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Disk cache occupancy
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Create a record from a JSON object of fields
    ///
    /// # Errors
    /// Returns [`DistributionError::Storage`] if the repository fails
    pub async fn create_record(
        &self,
        owner: &OwnerRef,
        fields: Map<String, JsonValue>,
    ) -> Result<SavedRecord, DistributionError> {
        let id = self
            .repository
            .create(owner, FieldEdit::from_object(fields))
            .await?;
        info!(record = %id, owner = %owner, "record created");
        let saved = SavedRecord {
            id,
            version: Version::INITIAL,
        };
        self.after_save(saved).await;
        Ok(saved)
    }

    /// Apply a JSON object of field edits to an existing record
    ///
    /// # Errors
    /// - [`DistributionError::NotFound`] if the record is missing or deleted
    /// - [`DistributionError::Storage`] if the repository fails
    pub async fn update_record(
        &self,
        id: RecordId,
        owner: &OwnerRef,
        fields: Map<String, JsonValue>,
    ) -> Result<SavedRecord, DistributionError> {
        // save() would create unknown ids; updates only apply to live records
        self.repository.current_version(id).await?;
        let version = self
            .repository
            .save(id, owner, FieldEdit::from_object(fields))
            .await?;
        info!(record = %id, %version, "record updated");
        let saved = SavedRecord { id, version };
        self.after_save(saved).await;
        Ok(saved)
    }

    /// Load a live record
    ///
    /// # Errors
    /// Returns [`DistributionError::NotFound`] if missing or deleted
    pub async fn record(&self, id: RecordId) -> Result<ConfigurationRecord, DistributionError> {
        let record = self.repository.load(id).await?;
        if record.is_deleted() {
            return Err(DistributionError::record_not_found(id));
        }
        Ok(record)
    }

    /// Page through live records, oldest first
    ///
    /// `page` counts pages of `limit` records from zero.
    ///
    /// # Errors
    /// - [`DistributionError::InvalidRequest`] unless `limit` is in `1..=100`
    /// - [`DistributionError::Storage`] if the repository fails
    pub async fn list_records(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<Page<ConfigurationRecord>, DistributionError> {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(DistributionError::InvalidRequest(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}, got {limit}"
            )));
        }
        Ok(self.repository.list(page.saturating_mul(limit), limit).await?)
    }

    /// Soft-delete a record
    ///
    /// Outstanding tokens for its artifacts stop working.
    ///
    /// # Errors
    /// Returns [`DistributionError::NotFound`] if missing or already deleted
    pub async fn delete_record(&self, id: RecordId) -> Result<(), DistributionError> {
        self.repository.soft_delete(id).await?;
        info!(record = %id, "record deleted");
        Ok(())
    }

    /// Issue a download token for the current version of a record
    ///
    /// Materializes (validating the schema), caches the artifact, records
    /// its provenance and pins it until the token expires.
    ///
    /// # Errors
    /// - [`DistributionError::NotFound`] if the record is missing or deleted
    /// - [`DistributionError::Materialization`] if the content is invalid
    /// - [`DistributionError::InvalidRequest`] for a zero ttl
    /// - [`DistributionError::Storage`] on cache failures
    pub async fn issue_token(
        &self,
        id: RecordId,
        ttl: Option<Duration>,
    ) -> Result<IssuedToken, DistributionError> {
        let record = self.record(id).await?;
        let version = record.version;
        let artifact = self.materialize(record, version).await?;
        let fingerprint = *artifact.fingerprint();

        let token = self
            .tokens
            .issue(fingerprint, ttl.unwrap_or_else(|| self.config.default_token_ttl()))?;
        self.cache.pin(fingerprint, token.expires_at());
        self.store(&artifact).await?;

        info!(
            record = %id,
            %version,
            fingerprint = %fingerprint.short(),
            expires_at = %token.expires_at(),
            "download token issued"
        );
        Ok(IssuedToken {
            token: token.encode(),
            fingerprint,
            record_id: id,
            version,
            expires_at: token.expires_at(),
        })
    }

    /// Redeem a download token
    ///
    /// # Errors
    /// - [`DistributionError::TokenInvalid`] for malformed, forged or expired
    ///   tokens; nothing else is touched in that case
    /// - [`DistributionError::NotFound`] if the source record is gone
    /// - [`DistributionError::CacheIntegrity`] if regeneration yields a
    ///   different fingerprint
    /// - [`DistributionError::Storage`] on repository or cache failures
    pub async fn download(&self, token: &str) -> Result<Download, DistributionError> {
        transition(DownloadState::Requested, None);
        let fingerprint = match self.tokens.verify(token) {
            Ok(fp) => fp,
            Err(e) => {
                transition(DownloadState::Rejected, None);
                return Err(e.into());
            }
        };
        transition(DownloadState::TokenValidated, Some(&fingerprint));

        match self.resolve(fingerprint).await {
            Ok(download) => {
                transition(DownloadState::Resolved, Some(&fingerprint));
                transition(DownloadState::Served, Some(&fingerprint));
                Ok(download)
            }
            Err(e) => {
                transition(DownloadState::Failed, Some(&fingerprint));
                if let DistributionError::CacheIntegrity(_) = e {
                    error!(fingerprint = %fingerprint, error = %e, "artifact integrity violation");
                }
                Err(e)
            }
        }
    }

    /// Switch token signing to `key`; the previous key stays valid for one
    /// maximum token lifetime
    pub fn rotate_signing_key(&self, key: SigningKey) {
        self.tokens.rotate(key);
    }

    async fn resolve(&self, fingerprint: Fingerprint) -> Result<Download, DistributionError> {
        let provenance = self
            .provenance
            .lookup(&fingerprint)
            .await?
            .ok_or_else(|| DistributionError::NotFound(format!("artifact {}", fingerprint.short())))?;
        // deleted records stop serving even when their bytes are still cached
        self.repository.current_version(provenance.record_id).await?;

        let bytes = match self.lookup_cached(&fingerprint).await? {
            Some(bytes) => bytes,
            None => {
                self.flights
                    .run(fingerprint, || self.regenerate(fingerprint, provenance))
                    .await?
            }
        };

        Ok(Download {
            bytes,
            content_type: ARTIFACT_CONTENT_TYPE,
            file_name: artifact_file_name(provenance.record_id, provenance.version),
            fingerprint,
        })
    }

    async fn lookup_cached(&self, fingerprint: &Fingerprint) -> Result<Option<Bytes>, DistributionError> {
        if let Some(hot) = &self.hot {
            if let Some(bytes) = hot.get(fingerprint).await {
                self.cache.touch(fingerprint);
                return Ok(Some(bytes));
            }
        }
        let Some(bytes) = self.cache.get(fingerprint).await? else {
            return Ok(None);
        };
        if let Some(hot) = &self.hot {
            hot.insert(*fingerprint, bytes.clone()).await;
        }
        Ok(Some(bytes))
    }

    async fn regenerate(
        &self,
        fingerprint: Fingerprint,
        provenance: Provenance,
    ) -> Result<Bytes, DistributionError> {
        // a previous leader may have filled the cache while we queued
        if let Some(bytes) = self.lookup_cached(&fingerprint).await? {
            return Ok(bytes);
        }
        debug!(
            fingerprint = %fingerprint.short(),
            record = %provenance.record_id,
            version = %provenance.version,
            "regenerating evicted artifact"
        );

        let record = self.repository.load(provenance.record_id).await?;
        if record.is_deleted() {
            return Err(DistributionError::record_not_found(provenance.record_id));
        }
        let artifact = self.materialize(record, provenance.version).await?;
        if *artifact.fingerprint() != fingerprint {
            return Err(DistributionError::CacheIntegrity(fingerprint));
        }
        self.store(&artifact).await?;
        Ok(artifact.payload().clone())
    }

    async fn materialize(
        &self,
        record: ConfigurationRecord,
        version: Version,
    ) -> Result<Artifact, DistributionError> {
        let materializer = Arc::clone(&self.materializer);
        let record_id = record.id;
        tokio::task::spawn_blocking(move || materializer.materialize(&record, version))
            .await
            .map_err(|e| {
                error!(record = %record_id, error = %e, "materialization task failed");
                DistributionError::Storage("materialization task failed".into())
            })?
            .map_err(DistributionError::from)
    }

    async fn store(&self, artifact: &Artifact) -> Result<(), DistributionError> {
        let fingerprint = *artifact.fingerprint();
        self.provenance
            .record(
                fingerprint,
                Provenance::new(artifact.record_id(), artifact.version()),
            )
            .await?;
        self.cache.put(fingerprint, artifact.payload()).await?;
        if let Some(hot) = &self.hot {
            hot.insert(fingerprint, artifact.payload().clone()).await;
        }
        Ok(())
    }

    async fn after_save(&self, saved: SavedRecord) {
        if !self.config.eager_materialize {
            return;
        }
        match self.materialize_saved(saved).await {
            Ok(()) => debug!(record = %saved.id, version = %saved.version, "eagerly materialized"),
            Err(e) => warn!(
                record = %saved.id,
                version = %saved.version,
                error = %e,
                "eager materialization skipped"
            ),
        }
    }

    async fn materialize_saved(&self, saved: SavedRecord) -> Result<(), DistributionError> {
        let record = self.repository.load(saved.id).await?;
        let artifact = self.materialize(record, saved.version).await?;
        self.store(&artifact).await
    }
}
