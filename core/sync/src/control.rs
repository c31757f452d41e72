//! Access to the singleton control records: `meta/global` and `crypto/keys`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use syncto_common::{Error, Result};
use syncto_crypto::EncryptedPayload;
use syncto_storage::{Collection, CollectionOptions, FixedId, Record, RecordStore, SyncResult};

/// Collection holding the global metadata record.
pub const META: &str = "meta";
/// Collection holding the encrypted key bundle record.
pub const CRYPTO: &str = "crypto";
/// Id of the global metadata record.
pub const GLOBAL_ID: &str = "global";
/// Id of the key bundle record.
pub const KEYS_ID: &str = "keys";

/// Supported storage format version.
pub const STORAGE_VERSION: u64 = 5;

/// Whether `name` is reserved for a control collection.
pub fn is_control_collection(name: &str) -> bool {
    name == META || name == CRYPTO
}

/// Per-engine entry in `meta/global`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(rename = "syncID", default, skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<String>,
}

/// Cleartext of the `meta/global` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaGlobal {
    #[serde(rename = "storageVersion")]
    pub storage_version: u64,
    #[serde(rename = "syncID", default, skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<String>,
    #[serde(default)]
    pub engines: HashMap<String, EngineMeta>,
    #[serde(default)]
    pub declined: Vec<String>,
}

impl MetaGlobal {
    /// Parse the record payload (a JSON string).
    pub fn from_record(record: &Record) -> Result<Self> {
        serde_json::from_str(record.payload_str()?).map_err(|e| {
            Error::Serialization(format!("Malformed {}/{} record: {}", META, GLOBAL_ID, e))
        })
    }

    /// Check the storage version is the supported one.
    pub fn check_version(&self) -> Result<()> {
        if self.storage_version == STORAGE_VERSION {
            Ok(())
        } else {
            Err(Error::Storage(format!(
                "Unsupported storage version {} (expected {})",
                self.storage_version, STORAGE_VERSION
            )))
        }
    }

    /// Whether another client enabled syncing of `collection`.
    pub fn is_enabled(&self, collection: &str) -> bool {
        self.engines.contains_key(collection) && !self.declined.iter().any(|d| d == collection)
    }
}

/// Handles on the two control collections.
///
/// Both are mirrored without transformers: `meta/global` is plaintext
/// and `crypto/keys` is decrypted with the root bundle, not a collection
/// key.
pub struct ControlCollections {
    meta: Arc<Collection>,
    crypto: Arc<Collection>,
}

impl ControlCollections {
    pub fn open(store: &RecordStore) -> Result<Self> {
        let fixed = |id: &str| CollectionOptions {
            id_schema: Arc::new(FixedId::new(id)),
            remote_transformers: Vec::new(),
        };

        Ok(Self {
            meta: store.collection(META, fixed(GLOBAL_ID))?,
            crypto: store.collection(CRYPTO, fixed(KEYS_ID))?,
        })
    }

    /// Pull the meta collection.
    pub async fn sync_meta(&self) -> Result<SyncResult> {
        self.meta.sync().await
    }

    /// The synced global record, or `None` if it does not exist.
    pub async fn global(&self) -> Result<Option<Record>> {
        match self.meta.get(GLOBAL_ID).await {
            Ok(record) if !record.deleted => Ok(Some(record)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read the encrypted keys payload, pulling the crypto collection once
    /// if it is not mirrored yet.
    pub async fn keys(&self) -> Result<EncryptedPayload> {
        let record = match self.crypto.get(KEYS_ID).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                debug!("Keys record not mirrored, pulling {}", CRYPTO);
                self.crypto.sync().await?;
                self.crypto.get(KEYS_ID).await?
            }
            Err(e) => return Err(e),
        };

        EncryptedPayload::from_json(record.payload_str()?).map_err(|e| {
            Error::Serialization(format!("Malformed {}/{} record: {}", CRYPTO, KEYS_ID, e))
        })
    }
}
