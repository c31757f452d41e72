//! Contract for caller-supplied collection adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use syncto_common::{ClientStateId, Result};
use syncto_storage::{Collection, Conflict, Record};

/// Key under which the engine injects the client-state id.
pub const USERID_KEY: &str = "userid";

/// Opaque per-collection options handed to an adapter.
///
/// The engine overwrites `userid` with the account's client-state id, so
/// adapters can namespace their own persisted cursors per account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncOptions(Map<String, Value>);

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `insert`.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Client-state id injected by the engine.
    pub fn userid(&self) -> Option<&str> {
        self.0.get(USERID_KEY).and_then(Value::as_str)
    }

    pub(crate) fn with_userid(mut self, client_state: &ClientStateId) -> Self {
        self.0.insert(
            USERID_KEY.to_string(),
            Value::String(client_state.as_str().to_string()),
        );
        self
    }
}

impl From<Map<String, Value>> for SyncOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Reconciles one synced collection with the caller's local data.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    /// Merge the freshly pulled collection into local state and write back
    /// any local changes to `collection`.
    ///
    /// Returns true when records were written that must be pushed.
    async fn update(&self, collection: Arc<Collection>, options: &SyncOptions) -> Result<bool>;

    /// Pick the winning record for a conflict.
    ///
    /// The returned record must carry the conflict's id.
    async fn handle_conflict(&self, conflict: &Conflict) -> Result<Record>;

    /// Forget any per-account state (cursors, caches).
    async fn reset(&self, _options: &SyncOptions) -> Result<()> {
        Ok(())
    }
}
