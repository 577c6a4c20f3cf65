//! MongoDB-backed document repository
//!
//! One document per record in the `agent_configs` collection:
//!
//! ```text
//! { _id: "<uuid>", owner, version, revisions: [{version, edits, saved_at}],
//!   created_at, updated_at, deleted_at?, is_deleted }
//! ```
//!
//! Saves use optimistic concurrency on `version`: the update only matches
//! when the stored version is the one the new revision was built on.

use crate::error::RepositoryError;
use crate::repository::{DocumentRepository, Page};
use async_trait::async_trait;
use bson::{doc, Bson};
use cfgvault_artifact::{
    Clock, ConfigurationRecord, FieldEdit, OwnerRef, RecordId, Revision, SystemClock, Version,
};
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::FindOptions;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const COLLECTION: &str = "agent_configs";
const MAX_SAVE_ATTEMPTS: u32 = 8;
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordDocument {
    #[serde(rename = "_id")]
    id: String,
    owner: String,
    version: i64,
    revisions: Vec<RevisionDocument>,
    created_at: bson::DateTime,
    updated_at: bson::DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted_at: Option<bson::DateTime>,
    #[serde(default)]
    is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RevisionDocument {
    version: i64,
    edits: Vec<EditDocument>,
    saved_at: bson::DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EditDocument {
    field: String,
    value: Bson,
}

fn backend(context: &str, err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Backend(format!("{context}: {err}"))
}

fn to_i64(version: Version) -> Result<i64, RepositoryError> {
    i64::try_from(version.get()).map_err(|e| backend("version overflow", e))
}

fn revision_document(
    version: Version,
    edits: &[FieldEdit],
    now: bson::DateTime,
) -> Result<RevisionDocument, RepositoryError> {
    let edits = edits
        .iter()
        .map(|edit| {
            Ok(EditDocument {
                field: edit.field.clone(),
                value: bson::to_bson(&edit.value).map_err(|e| backend("encode edit", e))?,
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;
    Ok(RevisionDocument {
        version: to_i64(version)?,
        edits,
        saved_at: now,
    })
}

impl RecordDocument {
    fn into_record(self) -> Result<ConfigurationRecord, RepositoryError> {
        let id: RecordId = self.id.parse().map_err(|e| backend("stored record id", e))?;
        let version = u64::try_from(self.version).map_err(|e| backend("stored version", e))?;
        let revisions = self
            .revisions
            .into_iter()
            .map(|rev| {
                Ok(Revision {
                    version: Version(
                        u64::try_from(rev.version).map_err(|e| backend("stored version", e))?,
                    ),
                    edits: rev
                        .edits
                        .into_iter()
                        .map(|e| FieldEdit::new(e.field, e.value.into_relaxed_extjson()))
                        .collect(),
                    saved_at: rev.saved_at.to_chrono(),
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(ConfigurationRecord {
            id,
            owner: OwnerRef::new(self.owner),
            revisions,
            version: Version(version),
            created_at: self.created_at.to_chrono(),
            updated_at: self.updated_at.to_chrono(),
            deleted_at: self.deleted_at.map(bson::DateTime::to_chrono),
        })
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

/// Repository storing records in MongoDB
#[derive(Debug, Clone)]
pub struct MongoRepository {
    collection: Collection<RecordDocument>,
    clock: Arc<dyn Clock>,
}

impl MongoRepository {
    /// Connect to `uri` and use database `db_name`
    ///
    /// # Errors
    /// Returns [`RepositoryError::Backend`] if the server is unreachable
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, RepositoryError> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| backend("connect to MongoDB", e))?;
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| backend("MongoDB ping", e))?;
        info!(database = db_name, "connected to MongoDB");

        Ok(Self {
            collection: client.database(db_name).collection(COLLECTION),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` for record timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn find(&self, id: RecordId) -> Result<Option<RecordDocument>, RepositoryError> {
        self.collection
            .find_one(doc! { "_id": id.to_string() })
            .await
            .map_err(|e| backend("find record", e))
    }
}

#[async_trait]
impl DocumentRepository for MongoRepository {
    async fn load(&self, id: RecordId) -> Result<ConfigurationRecord, RepositoryError> {
        self.find(id)
            .await?
            .ok_or(RepositoryError::NotFound(id))?
            .into_record()
    }

    async fn save(
        &self,
        id: RecordId,
        owner: &OwnerRef,
        edits: Vec<FieldEdit>,
    ) -> Result<Version, RepositoryError> {
        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let now = bson::DateTime::from_chrono(self.clock.now());

            let Some(existing) = self.find(id).await? else {
                let document = RecordDocument {
                    id: id.to_string(),
                    owner: owner.as_str().to_owned(),
                    version: to_i64(Version::INITIAL)?,
                    revisions: vec![revision_document(Version::INITIAL, &edits, now)?],
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                    is_deleted: false,
                };
                match self.collection.insert_one(&document).await {
                    Ok(_) => {
                        debug!(record = %id, version = %Version::INITIAL, "record created");
                        return Ok(Version::INITIAL);
                    }
                    Err(e) if is_duplicate_key(&e) => {
                        debug!(record = %id, attempt, "lost creation race, retrying as update");
                        continue;
                    }
                    Err(e) => return Err(backend("insert record", e)),
                }
            };

            if existing.is_deleted {
                return Err(RepositoryError::NotFound(id));
            }
            let base = existing.version;
            let next = Version(u64::try_from(base).map_err(|e| backend("stored version", e))?).next();
            let next_version = to_i64(next)?;
            let revision = bson::to_bson(&revision_document(next, &edits, now)?)
                .map_err(|e| backend("encode revision", e))?;

            let result = self
                .collection
                .update_one(
                    doc! { "_id": id.to_string(), "version": base, "is_deleted": false },
                    doc! {
                        "$set": { "version": next_version, "updated_at": now },
                        "$push": { "revisions": revision },
                    },
                )
                .await
                .map_err(|e| backend("update record", e))?;

            if result.matched_count == 1 {
                debug!(record = %id, version = %next, "record saved");
                return Ok(next);
            }
            debug!(record = %id, attempt, "version conflict, retrying");
        }

        warn!(record = %id, attempts = MAX_SAVE_ATTEMPTS, "save gave up under contention");
        Err(RepositoryError::Conflict {
            id,
            attempts: MAX_SAVE_ATTEMPTS,
        })
    }

    async fn current_version(&self, id: RecordId) -> Result<Version, RepositoryError> {
        match self.find(id).await? {
            Some(doc) if !doc.is_deleted => u64::try_from(doc.version)
                .map(Version)
                .map_err(|e| backend("stored version", e)),
            _ => Err(RepositoryError::NotFound(id)),
        }
    }

    async fn soft_delete(&self, id: RecordId) -> Result<(), RepositoryError> {
        let now = bson::DateTime::from_chrono(self.clock.now());
        let result = self
            .collection
            .update_one(
                doc! { "_id": id.to_string(), "is_deleted": false },
                doc! { "$set": { "is_deleted": true, "deleted_at": now } },
            )
            .await
            .map_err(|e| backend("soft-delete record", e))?;
        if result.matched_count == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        debug!(record = %id, "record soft-deleted");
        Ok(())
    }

    async fn list(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Page<ConfigurationRecord>, RepositoryError> {
        let filter = doc! { "is_deleted": false };
        let total = self
            .collection
            .count_documents(filter.clone())
            .await
            .map_err(|e| backend("count records", e))?;

        let options = FindOptions::builder()
            .sort(doc! { "created_at": 1, "_id": 1 })
            .skip(offset)
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .build();
        let documents: Vec<RecordDocument> = self
            .collection
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| backend("list records", e))?
            .try_collect()
            .await
            .map_err(|e| backend("read record page", e))?;

        let items = documents
            .into_iter()
            .map(RecordDocument::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            offset,
            limit,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn document_converts_back_to_record() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let id = RecordId::new();
        let edits = vec![
            FieldEdit::new("name", json!("agent")),
            FieldEdit::new("tool_ids", json!(["a", "b"])),
        ];
        let bnow = bson::DateTime::from_chrono(now);
        let document = RecordDocument {
            id: id.to_string(),
            owner: "alice".into(),
            version: 1,
            revisions: vec![revision_document(Version(1), &edits, bnow).unwrap()],
            created_at: bnow,
            updated_at: bnow,
            deleted_at: None,
            is_deleted: false,
        };

        let record = document.into_record().unwrap();
        assert_eq!(record, ConfigurationRecord::create(id, OwnerRef::new("alice"), edits, now));
    }

    #[test]
    fn corrupt_id_is_a_backend_error() {
        let now = bson::DateTime::now();
        let document = RecordDocument {
            id: "nope".into(),
            owner: "alice".into(),
            version: 1,
            revisions: vec![],
            created_at: now,
            updated_at: now,
            deleted_at: None,
            is_deleted: false,
        };
        assert!(matches!(
            document.into_record(),
            Err(RepositoryError::Backend(_))
        ));
    }
}
