//! Local mirror of one remote collection.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::id_schema::{AnyId, IdSchema};
use crate::record::{Conflict, Record, SyncResult};
use crate::remote::{PushOutcome, Remote};
use crate::transformer::RemoteTransformer;
use syncto_common::{Error, Result};

/// Local status of a mirrored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Identical to the last known remote version.
    Synced,
    /// Created locally, never uploaded.
    Created,
    /// Modified locally since the last sync.
    Updated,
    /// Deleted locally, tombstone not yet uploaded.
    Deleted,
}

#[derive(Debug, Clone)]
struct LocalRecord {
    record: Record,
    status: RecordStatus,
}

impl LocalRecord {
    fn synced(record: Record) -> Self {
        Self {
            record,
            status: RecordStatus::Synced,
        }
    }
}

#[derive(Debug, Default)]
struct CollectionState {
    records: HashMap<String, LocalRecord>,
    last_modified: Option<u64>,
}

/// Per-collection configuration.
#[derive(Clone)]
pub struct CollectionOptions {
    /// Id generation and validation.
    pub id_schema: Arc<dyn IdSchema>,
    /// Applied in order on upload, in reverse order on download.
    pub remote_transformers: Vec<Arc<dyn RemoteTransformer>>,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            id_schema: Arc::new(AnyId),
            remote_transformers: Vec::new(),
        }
    }
}

/// Handle to a locally mirrored collection.
///
/// Local writes are recorded with a pending status and published on the
/// next `sync`. Only one sync runs at a time per collection.
pub struct Collection {
    name: String,
    options: CollectionOptions,
    remote: Arc<dyn Remote>,
    state: RwLock<CollectionState>,
    sync_lock: Mutex<()>,
}

impl Collection {
    /// Create an empty mirror of `name` on `remote`.
    pub fn new(
        name: impl Into<String>,
        remote: Arc<dyn Remote>,
        options: CollectionOptions,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            remote,
            state: RwLock::new(CollectionState::default()),
            sync_lock: Mutex::new(()),
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remote timestamp of the last pull.
    pub async fn last_modified(&self) -> Option<u64> {
        self.state.read().await.last_modified
    }

    /// Get a record by id.
    ///
    /// # Errors
    /// - `Error::NotFound` if the record is absent or deleted locally
    pub async fn get(&self, id: &str) -> Result<Record> {
        let state = self.state.read().await;
        match state.records.get(id) {
            Some(local) if local.status != RecordStatus::Deleted => Ok(local.record.clone()),
            _ => Err(Error::NotFound(format!(
                "Record {} not found in {}",
                id, self.name
            ))),
        }
    }

    /// List mirrored records, newest first.
    ///
    /// Records deleted locally are excluded; remote tombstones are kept so
    /// callers can apply them.
    pub async fn list(&self) -> Vec<Record> {
        let state = self.state.read().await;
        let mut records: Vec<Record> = state
            .records
            .values()
            .filter(|local| local.status != RecordStatus::Deleted)
            .map(|local| local.record.clone())
            .collect();
        records.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        records
    }

    /// Local status of a record, if mirrored.
    pub async fn status(&self, id: &str) -> Option<RecordStatus> {
        self.state.read().await.records.get(id).map(|l| l.status)
    }

    /// Records waiting to be published.
    pub async fn pending(&self) -> usize {
        self.state
            .read()
            .await
            .records
            .values()
            .filter(|local| local.status != RecordStatus::Synced)
            .count()
    }

    /// Create a record from a cleartext JSON object.
    ///
    /// The id is taken from the payload's `id` field, or generated by the
    /// id schema when absent.
    ///
    /// # Errors
    /// - `Error::TypeMismatch` if the payload is not an object
    /// - `Error::InvalidInput` if the id is rejected by the id schema
    /// - `Error::Storage` if a live record with that id exists
    pub async fn create(&self, payload: Value) -> Result<Record> {
        let object = payload.as_object().ok_or_else(|| {
            Error::TypeMismatch(format!("Record payload for {} must be an object", self.name))
        })?;
        let id = match object.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(_) => {
                return Err(Error::TypeMismatch("Record id must be a string".to_string()));
            }
            None => self.options.id_schema.generate(),
        };
        self.check_id(&id)?;

        let mut state = self.state.write().await;
        let (status, last_modified) = match state.records.get(&id) {
            Some(existing)
                if existing.status != RecordStatus::Deleted && !existing.record.deleted =>
            {
                return Err(Error::Storage(format!(
                    "Record {} already exists in {}",
                    id, self.name
                )));
            }
            Some(existing) => (RecordStatus::Updated, existing.record.last_modified),
            None => (RecordStatus::Created, None),
        };

        let record = Record {
            last_modified,
            ..Record::new(id.clone(), payload)
        };
        state.records.insert(
            id,
            LocalRecord {
                record: record.clone(),
                status,
            },
        );

        Ok(record)
    }

    /// Insert or replace a record.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if the id is rejected by the id schema
    /// - `Error::TypeMismatch` if a live record's payload is not an object
    pub async fn update(&self, record: Record) -> Result<Record> {
        self.check_id(&record.id)?;
        if !record.deleted && !record.payload.is_object() {
            return Err(Error::TypeMismatch(format!(
                "Record payload for {} must be an object",
                self.name
            )));
        }

        let mut state = self.state.write().await;
        let previous = state.records.get(&record.id);
        let status = match previous.map(|l| l.status) {
            None | Some(RecordStatus::Created) => RecordStatus::Created,
            Some(_) => RecordStatus::Updated,
        };
        let last_modified = previous.and_then(|l| l.record.last_modified);

        let stored = Record {
            last_modified,
            ..record
        };
        state.records.insert(
            stored.id.clone(),
            LocalRecord {
                record: stored.clone(),
                status,
            },
        );

        Ok(stored)
    }

    /// Delete a record locally; the tombstone is published on next sync.
    ///
    /// # Errors
    /// - `Error::NotFound` if the record is absent or already deleted
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let status = match state.records.get(id) {
            Some(local) if local.status != RecordStatus::Deleted => local.status,
            _ => {
                return Err(Error::NotFound(format!(
                    "Record {} not found in {}",
                    id, self.name
                )));
            }
        };

        if status == RecordStatus::Created {
            state.records.remove(id);
        } else if let Some(local) = state.records.get_mut(id) {
            local.record.deleted = true;
            local.record.payload = Value::Null;
            local.status = RecordStatus::Deleted;
        }

        Ok(())
    }

    /// Replace a conflicting local record with `resolution`.
    ///
    /// The resolution is based on the remote version, so the next sync
    /// publishes it without conflicting again.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if the resolution targets another id
    pub async fn resolve(&self, conflict: &Conflict, resolution: Record) -> Result<Record> {
        if resolution.id != conflict.id() {
            return Err(Error::InvalidInput(format!(
                "Resolution for {} targets record {}",
                conflict.id(),
                resolution.id
            )));
        }

        let resolved = Record {
            last_modified: conflict.remote.last_modified,
            ..resolution
        };

        let mut state = self.state.write().await;
        state.records.insert(
            resolved.id.clone(),
            LocalRecord {
                record: resolved.clone(),
                status: RecordStatus::Updated,
            },
        );

        debug!(collection = %self.name, id = %resolved.id, "Resolved conflict");
        Ok(resolved)
    }

    /// Pull remote changes, then publish pending local changes.
    ///
    /// # Postconditions
    /// - `ok` is true iff no conflicts were detected
    /// - Conflicting records keep their local version until resolved
    ///
    /// # Errors
    /// - Any remote error; records already imported or published stay so
    /// - Transformer errors for records that fail to encode or decode
    pub async fn sync(&self) -> Result<SyncResult> {
        let _guard = self.sync_lock.lock().await;
        let mut result = SyncResult::default();

        self.pull(&mut result).await?;
        self.push(&mut result).await?;

        result.ok = result.conflicts.is_empty();
        info!(
            collection = %self.name,
            imported = result.imported,
            published = result.published,
            conflicts = result.conflicts.len(),
            "Collection synced"
        );
        Ok(result)
    }

    async fn pull(&self, result: &mut SyncResult) -> Result<()> {
        let since = self.state.read().await.last_modified;
        debug!(collection = %self.name, ?since, "Pulling remote changes");

        let changes = self.remote.fetch(&self.name, since).await?;

        let mut state = self.state.write().await;
        for raw in changes.records {
            let incoming = self.decode(raw)?;
            let pending = state
                .records
                .get(&incoming.id)
                .filter(|local| local.status != RecordStatus::Synced)
                .map(|local| local.record.clone());

            match pending {
                Some(local) if !local.same_content(&incoming) => {
                    result.conflicts.push(Conflict {
                        local,
                        remote: incoming,
                    });
                }
                _ => {
                    state
                        .records
                        .insert(incoming.id.clone(), LocalRecord::synced(incoming));
                    result.imported += 1;
                }
            }
        }

        if let Some(timestamp) = changes.timestamp {
            state.last_modified = Some(state.last_modified.map_or(timestamp, |t| t.max(timestamp)));
        }

        Ok(())
    }

    async fn push(&self, result: &mut SyncResult) -> Result<()> {
        let conflicted: HashSet<String> = result
            .conflicts
            .iter()
            .map(|c| c.id().to_string())
            .collect();

        let outgoing: Vec<Record> = self
            .state
            .read()
            .await
            .records
            .values()
            .filter(|local| {
                local.status != RecordStatus::Synced && !conflicted.contains(&local.record.id)
            })
            .map(|local| local.record.clone())
            .collect();

        if outgoing.is_empty() {
            return Ok(());
        }
        debug!(collection = %self.name, count = outgoing.len(), "Publishing local changes");

        for record in outgoing {
            let encoded = self.encode(record.clone())?;
            match self
                .remote
                .put(&self.name, encoded, record.last_modified)
                .await?
            {
                PushOutcome::Accepted { last_modified } => {
                    self.mark_published(&record, last_modified).await;
                    result.published += 1;
                }
                PushOutcome::Conflict { remote } => {
                    result.conflicts.push(Conflict {
                        local: record,
                        remote: self.decode(remote)?,
                    });
                }
            }
        }

        Ok(())
    }

    /// Record that `published` was stored remotely at `last_modified`.
    ///
    /// A record edited again while the upload was in flight stays pending.
    async fn mark_published(&self, published: &Record, last_modified: u64) {
        let mut state = self.state.write().await;
        let unchanged = match state.records.get(&published.id) {
            Some(local) => local.record.same_content(published),
            None => return,
        };

        if unchanged && published.deleted {
            state.records.remove(&published.id);
        } else if let Some(local) = state.records.get_mut(&published.id) {
            local.record.last_modified = Some(last_modified);
            local.status = if unchanged {
                RecordStatus::Synced
            } else {
                RecordStatus::Updated
            };
        }
    }

    fn check_id(&self, id: &str) -> Result<()> {
        if self.options.id_schema.validate(id) {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "Invalid record id {:?} for {}",
                id, self.name
            )))
        }
    }

    fn encode(&self, record: Record) -> Result<Record> {
        self.options
            .remote_transformers
            .iter()
            .try_fold(record, |record, transformer| transformer.encode(record))
    }

    fn decode(&self, record: Record) -> Result<Record> {
        self.options
            .remote_transformers
            .iter()
            .rev()
            .try_fold(record, |record, transformer| transformer.decode(record))
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("remote", &self.remote.name())
            .finish_non_exhaustive()
    }
}
