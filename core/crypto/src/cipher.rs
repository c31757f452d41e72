//! Record cipher contract and its key-bundle backed implementation.

use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;

use crate::envelope::EncryptedPayload;
use crate::keys::{CollectionKeys, MasterKey};
use syncto_common::{Error, Result};

/// Authenticated encryption of JSON records, scoped per collection.
///
/// `set_keys` must succeed before `encrypt`/`decrypt` can be used.
pub trait RecordCipher: Send + Sync {
    /// Install the collection keys carried by the encrypted keys record.
    ///
    /// # Errors
    /// - `Error::IntegrityCheck` if the keys do not verify against `master_key`
    /// - any other error for malformed key material
    fn set_keys(&self, master_key: &MasterKey, keys: &EncryptedPayload) -> Result<()>;

    /// Encrypt a cleartext record for `collection`.
    fn encrypt(&self, cleartext: &Value, collection: &str) -> Result<EncryptedPayload>;

    /// Decrypt an envelope fetched from `collection`.
    fn decrypt(&self, envelope: &EncryptedPayload, collection: &str) -> Result<Value>;
}

/// `RecordCipher` backed by the decrypted `crypto/keys` bundle set.
#[derive(Default)]
pub struct SyncCrypto {
    keys: RwLock<Option<CollectionKeys>>,
}

impl SyncCrypto {
    /// Create a cipher with no keys installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cipher with an already decrypted key set.
    pub fn with_keys(keys: CollectionKeys) -> Self {
        Self {
            keys: RwLock::new(Some(keys)),
        }
    }

    /// Whether keys have been installed.
    pub fn has_keys(&self) -> bool {
        self.keys.read().is_some()
    }
}

impl RecordCipher for SyncCrypto {
    fn set_keys(&self, master_key: &MasterKey, keys: &EncryptedPayload) -> Result<()> {
        let opened = CollectionKeys::open(master_key, keys)?;
        *self.keys.write() = Some(opened);
        Ok(())
    }

    fn encrypt(&self, cleartext: &Value, collection: &str) -> Result<EncryptedPayload> {
        let guard = self.keys.read();
        let keys = guard
            .as_ref()
            .ok_or_else(|| Error::Crypto("Collection keys have not been set".to_string()))?;

        let plaintext = serde_json::to_vec(cleartext)?;
        EncryptedPayload::seal(keys.for_collection(collection), &plaintext)
    }

    fn decrypt(&self, envelope: &EncryptedPayload, collection: &str) -> Result<Value> {
        let guard = self.keys.read();
        let keys = guard
            .as_ref()
            .ok_or_else(|| Error::Crypto("Collection keys have not been set".to_string()))?;

        let plaintext = envelope.open(keys.for_collection(collection))?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| Error::Crypto(format!("Decrypted payload is not JSON: {}", e)))
    }
}

impl fmt::Debug for SyncCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCrypto")
            .field("has_keys", &self.has_keys())
            .finish()
    }
}
