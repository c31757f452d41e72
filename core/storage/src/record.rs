//! Record, conflict and sync result types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use syncto_common::{Error, Result};

/// A single record in a collection.
///
/// On the wire `payload` holds the encrypted envelope as a JSON string;
/// once decoded it holds the cleartext JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier, unique within its collection.
    pub id: String,
    /// Server timestamp in milliseconds, absent until first uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<u64>,
    /// Tombstone marker.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Record body.
    #[serde(default)]
    pub payload: Value,
}

impl Record {
    /// Create a new record that has never been uploaded.
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            last_modified: None,
            deleted: false,
            payload,
        }
    }

    /// Create a tombstone for `id`.
    pub fn tombstone(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            last_modified: None,
            deleted: true,
            payload: Value::Null,
        }
    }

    /// Set the server timestamp.
    pub fn with_last_modified(mut self, last_modified: u64) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// The payload as a string, as stored remotely.
    ///
    /// # Errors
    /// - `Error::TypeMismatch` if the payload is not a string
    pub fn payload_str(&self) -> Result<&str> {
        self.payload.as_str().ok_or_else(|| {
            Error::TypeMismatch(format!("Payload of record {} is not a string", self.id))
        })
    }

    /// Whether two records carry the same content, ignoring timestamps.
    pub fn same_content(&self, other: &Record) -> bool {
        self.id == other.id && self.deleted == other.deleted && self.payload == other.payload
    }
}

/// Same-id divergence between the local mirror and the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// The unsynced local version.
    pub local: Record,
    /// The (decoded) remote version.
    pub remote: Record,
}

impl Conflict {
    /// Identifier of the conflicting record.
    pub fn id(&self) -> &str {
        &self.remote.id
    }
}

/// Outcome of one `Collection::sync` call.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// True when no conflicts were detected.
    pub ok: bool,
    /// Conflicts in detection order.
    pub conflicts: Vec<Conflict>,
    /// Remote records written into the mirror.
    pub imported: usize,
    /// Local records accepted by the remote.
    pub published: usize,
}
