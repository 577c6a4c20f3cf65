//! Artifacts and their materialization
//!
//! [`Materializer::materialize`] is the only way to obtain an [`Artifact`]:
//! it validates a record version against the agent configuration schema and
//! produces the canonical payload plus its [`Fingerprint`].

use crate::canonical::write_canonical;
use crate::hash::Fingerprint;
use crate::record::{ConfigurationRecord, RecordId, Version};
use crate::schema::{validate_agent_config, SchemaViolation};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::fmt::Debug;

/// Payload layout version written into every artifact
pub const FORMAT_VERSION: u64 = 1;

/// MIME type of materialized artifacts
pub const ARTIFACT_CONTENT_TYPE: &str = "application/json";

/// Errors raised while materializing a record version
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaterializationError {
    /// Content does not conform to the configuration schema
    #[error("configuration is invalid: {}", format_violations(.0))]
    Schema(Vec<SchemaViolation>),

    /// The record never had the requested version
    #[error("record {record_id} has no version {version}")]
    UnknownVersion { record_id: RecordId, version: Version },
}

impl MaterializationError {
    /// Violations to report back to the user (empty for non-schema errors)
    #[must_use]
    pub fn violations(&self) -> &[SchemaViolation] {
        match self {
            Self::Schema(v) => v,
            Self::UnknownVersion { .. } => &[],
        }
    }
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Immutable materialization of one record version
///
/// # Invariants
/// - `fingerprint == Fingerprint::derive(record_id, version, payload)`
/// - never mutated after construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    record_id: RecordId,
    version: Version,
    fingerprint: Fingerprint,
    payload: Bytes,
    materialized_at: DateTime<Utc>,
}

impl Artifact {
    /// Source record
    #[inline]
    #[must_use]
    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    /// Source version
    #[inline]
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Content fingerprint
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Canonical payload bytes
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// When the artifact was produced (not part of the payload)
    #[inline]
    #[must_use]
    pub fn materialized_at(&self) -> DateTime<Utc> {
        self.materialized_at
    }

    /// Download file name for this artifact
    #[must_use]
    pub fn file_name(&self) -> String {
        artifact_file_name(self.record_id, self.version)
    }

    /// Recompute the fingerprint from the payload and compare
    #[must_use]
    pub fn verify(&self) -> bool {
        self.fingerprint
            == Fingerprint::derive(
                &self.record_id.to_string(),
                self.version.get(),
                &self.payload,
            )
    }
}

/// Download file name for a record version
#[must_use]
pub fn artifact_file_name(record_id: RecordId, version: Version) -> String {
    format!("agent-{record_id}-v{}.json", version.get())
}

/// Turns record versions into artifacts
///
/// A trait so the distribution layer can observe or substitute
/// materialization (single-flight tests count calls through it).
pub trait Materialize: Send + Sync + Debug {
    /// Materialize `record` at `version`
    ///
    /// # Errors
    /// Returns [`MaterializationError`] if the version does not exist or
    /// its content violates the schema
    fn materialize(
        &self,
        record: &ConfigurationRecord,
        version: Version,
    ) -> Result<Artifact, MaterializationError>;
}

/// The canonical agent-configuration materializer
#[derive(Debug, Clone, Copy, Default)]
pub struct Materializer;

impl Materializer {
    /// Create a materializer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Canonical payload for already-validated content
    ///
    /// Layout: `{"config":{..},"format":1,"record_id":"..","version":n}\n`
    #[must_use]
    pub fn canonical_payload(
        record_id: RecordId,
        version: Version,
        content: &serde_json::Map<String, JsonValue>,
    ) -> Vec<u8> {
        let document = json!({
            "config": JsonValue::Object(content.clone()),
            "format": FORMAT_VERSION,
            "record_id": record_id.to_string(),
            "version": version.get(),
        });
        let mut out = String::with_capacity(256);
        write_canonical(&document, &mut out);
        out.push('\n');
        out.into_bytes()
    }
}

impl Materialize for Materializer {
    fn materialize(
        &self,
        record: &ConfigurationRecord,
        version: Version,
    ) -> Result<Artifact, MaterializationError> {
        let content =
            record
                .content_at(version)
                .ok_or(MaterializationError::UnknownVersion {
                    record_id: record.id,
                    version,
                })?;
        validate_agent_config(&content).map_err(MaterializationError::Schema)?;

        let payload = Self::canonical_payload(record.id, version, &content);
        let fingerprint = Fingerprint::derive(&record.id.to_string(), version.get(), &payload);
        Ok(Artifact {
            record_id: record.id,
            version,
            fingerprint,
            payload: Bytes::from(payload),
            materialized_at: Utc::now(),
        })
    }
}
