//! Remote record server interface.

use async_trait::async_trait;

use crate::record::Record;
use syncto_common::Result;

/// Records changed on the remote since a given timestamp.
#[derive(Debug, Clone, Default)]
pub struct RemoteChanges {
    /// Changed records, in their remote (encoded) form.
    pub records: Vec<Record>,
    /// Collection timestamp at the time of the fetch.
    pub timestamp: Option<u64>,
}

/// Result of uploading a single record.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The remote stored the record at `last_modified`.
    Accepted { last_modified: u64 },
    /// The remote holds a newer version; nothing was written.
    Conflict { remote: Record },
}

/// Remote end of a record collection.
///
/// Implementations must map transport failures to `Error::Network`,
/// unexpected statuses to `Error::Http` and malformed bodies to
/// `Error::TypeMismatch` or `Error::Serialization`.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Get the remote name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Fetch records of `collection` modified after `since`.
    ///
    /// # Postconditions
    /// - `since = None` returns the whole collection
    /// - Records are returned newest first
    async fn fetch(&self, collection: &str, since: Option<u64>) -> Result<RemoteChanges>;

    /// Upload one record.
    ///
    /// # Preconditions
    /// - `base` is the timestamp the local copy was derived from, or `None`
    ///   for a record that must not exist remotely yet
    ///
    /// # Postconditions
    /// - On `Accepted`, the record is stored with a new timestamp
    /// - On `Conflict`, the remote is unchanged
    async fn put(&self, collection: &str, record: Record, base: Option<u64>)
        -> Result<PushOutcome>;
}
