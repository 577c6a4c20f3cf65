//! Versioned configuration records
//!
//! A [`ConfigurationRecord`] is an ordered log of [`Revision`]s. Each save
//! appends one revision (a batch of [`FieldEdit`]s) and bumps the version, so
//! the content at any past version can be rebuilt from the record itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique record identifier (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate a fresh record id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Monotonic per-record version counter; the first saved version is 1
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// Version assigned on record creation
    pub const INITIAL: Self = Self(1);

    /// The version following this one
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw counter value
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Opaque reference to the owning user, supplied by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerRef(pub String);

impl OwnerRef {
    /// Wrap an owner identifier
    #[inline]
    pub fn new(owner: impl Into<String>) -> Self {
        Self(owner.into())
    }

    /// Owner identifier as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single field assignment. A `null` value removes the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEdit {
    /// Top-level field name
    pub field: String,
    /// New value
    pub value: JsonValue,
}

impl FieldEdit {
    /// Create a field edit
    #[inline]
    pub fn new(field: impl Into<String>, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    /// Turn every entry of a JSON object into an edit, in key order
    #[must_use]
    pub fn from_object(fields: Map<String, JsonValue>) -> Vec<Self> {
        fields
            .into_iter()
            .map(|(field, value)| Self { field, value })
            .collect()
    }
}

/// One saved batch of edits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Version produced by this revision
    pub version: Version,
    /// Edits applied, in order
    pub edits: Vec<FieldEdit>,
    /// Save timestamp
    pub saved_at: DateTime<Utc>,
}

/// Durable, versioned configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    /// Record identity
    pub id: RecordId,
    /// Owning user
    pub owner: OwnerRef,
    /// Revision log, ascending by version
    pub revisions: Vec<Revision>,
    /// Current version (equals the last revision's version)
    pub version: Version,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last save timestamp
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ConfigurationRecord {
    /// Create a record holding its first revision
    #[must_use]
    pub fn create(
        id: RecordId,
        owner: OwnerRef,
        edits: Vec<FieldEdit>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            revisions: vec![Revision {
                version: Version::INITIAL,
                edits,
                saved_at: now,
            }],
            version: Version::INITIAL,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Append a revision, bumping the version
    pub fn apply(&mut self, edits: Vec<FieldEdit>, now: DateTime<Utc>) -> Version {
        let version = self.version.next();
        self.revisions.push(Revision {
            version,
            edits,
            saved_at: now,
        });
        self.version = version;
        self.updated_at = now;
        version
    }

    /// Whether the record has been soft-deleted
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Content at the current version
    #[must_use]
    pub fn content(&self) -> Map<String, JsonValue> {
        self.content_at(self.version).unwrap_or_default()
    }

    /// Content at `version`, or `None` if the record never had that version
    #[must_use]
    pub fn content_at(&self, version: Version) -> Option<Map<String, JsonValue>> {
        if version.0 == 0 || version > self.version {
            return None;
        }
        let mut content = Map::new();
        for revision in self.revisions.iter().take_while(|r| r.version <= version) {
            for edit in &revision.edits {
                if edit.value.is_null() {
                    content.remove(&edit.field);
                } else {
                    content.insert(edit.field.clone(), edit.value.clone());
                }
            }
        }
        Some(content)
    }
}
