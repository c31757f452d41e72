//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::envelope::EncryptedPayload;
use crate::kdf::derive_root_bundle;
use syncto_common::{Error, Result};

/// Length of encryption and HMAC keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Account master key ("kB").
///
/// Root of the key hierarchy: the client-state id and the bundle that
/// protects the keys record are both derived from it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: Vec<u8>,
}

impl MasterKey {
    /// Create a master key from raw bytes.
    ///
    /// # Errors
    /// - Returns error if `key` is empty
    pub fn from_bytes(key: Vec<u8>) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::InvalidInput("Master key cannot be empty".to_string()));
        }
        Ok(Self { key })
    }

    /// Parse a hex-encoded master key.
    ///
    /// # Errors
    /// - Returns error if `hex_key` is empty or not valid hex
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let key = hex::decode(hex_key.trim())
            .map_err(|e| Error::InvalidInput(format!("Master key is not valid hex: {}", e)))?;
        Self::from_bytes(key)
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Encryption key paired with its HMAC key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyBundle {
    enc_key: [u8; KEY_LENGTH],
    hmac_key: [u8; KEY_LENGTH],
}

impl KeyBundle {
    /// Create a bundle from raw key bytes.
    pub fn from_bytes(enc_key: [u8; KEY_LENGTH], hmac_key: [u8; KEY_LENGTH]) -> Self {
        Self { enc_key, hmac_key }
    }

    /// Generate a random bundle.
    pub fn generate() -> Self {
        Self {
            enc_key: rand::random(),
            hmac_key: rand::random(),
        }
    }

    /// Decode a `[encB64, hmacB64]` pair as stored in the keys record.
    pub fn from_base64_pair(pair: &[String; 2]) -> Result<Self> {
        Ok(Self {
            enc_key: decode_key(&pair[0])?,
            hmac_key: decode_key(&pair[1])?,
        })
    }

    /// Encode as a `[encB64, hmacB64]` pair.
    pub fn to_base64_pair(&self) -> [String; 2] {
        [STANDARD.encode(self.enc_key), STANDARD.encode(self.hmac_key)]
    }

    /// Get the encryption key bytes.
    pub fn enc_key(&self) -> &[u8; KEY_LENGTH] {
        &self.enc_key
    }

    /// Get the HMAC key bytes.
    pub fn hmac_key(&self) -> &[u8; KEY_LENGTH] {
        &self.hmac_key
    }
}

impl PartialEq for KeyBundle {
    fn eq(&self, other: &Self) -> bool {
        let enc = self.enc_key[..].ct_eq(&other.enc_key[..]);
        let hmac = self.hmac_key[..].ct_eq(&other.hmac_key[..]);
        (enc & hmac).into()
    }
}

impl fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyBundle([REDACTED])")
    }
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_LENGTH]> {
    let mut bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Crypto(format!("Invalid base64 key: {}", e)))?;
    if bytes.len() != KEY_LENGTH {
        let len = bytes.len();
        bytes.zeroize();
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH, len
        )));
    }
    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(key)
}

/// Cleartext shape of the `crypto/keys` record.
#[derive(Serialize, Deserialize)]
struct KeysRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    collection: Option<String>,
    default: [String; 2],
    #[serde(default)]
    collections: HashMap<String, [String; 2]>,
}

/// Decrypted key bundle set: one default bundle plus optional
/// per-collection overrides.
#[derive(Clone)]
pub struct CollectionKeys {
    default: KeyBundle,
    collections: HashMap<String, KeyBundle>,
}

impl CollectionKeys {
    /// Create a key set with only a default bundle.
    pub fn new(default: KeyBundle) -> Self {
        Self {
            default,
            collections: HashMap::new(),
        }
    }

    /// Generate a fresh random key set.
    pub fn generate() -> Self {
        Self::new(KeyBundle::generate())
    }

    /// Add a bundle dedicated to one collection.
    pub fn with_collection(mut self, name: impl Into<String>, bundle: KeyBundle) -> Self {
        self.collections.insert(name.into(), bundle);
        self
    }

    /// Bundle used for `collection`, falling back to the default one.
    pub fn for_collection(&self, collection: &str) -> &KeyBundle {
        self.collections.get(collection).unwrap_or(&self.default)
    }

    /// Parse the decrypted keys record.
    pub fn from_cleartext(cleartext: &[u8]) -> Result<Self> {
        let record: KeysRecord = serde_json::from_slice(cleartext)
            .map_err(|e| Error::Crypto(format!("Malformed keys record: {}", e)))?;

        let mut collections = HashMap::with_capacity(record.collections.len());
        for (name, pair) in &record.collections {
            collections.insert(name.clone(), KeyBundle::from_base64_pair(pair)?);
        }

        Ok(Self {
            default: KeyBundle::from_base64_pair(&record.default)?,
            collections,
        })
    }

    /// Serialize as the cleartext keys record.
    pub fn to_cleartext(&self) -> Result<Vec<u8>> {
        let record = KeysRecord {
            id: Some("keys".to_string()),
            collection: Some("crypto".to_string()),
            default: self.default.to_base64_pair(),
            collections: self
                .collections
                .iter()
                .map(|(name, bundle)| (name.clone(), bundle.to_base64_pair()))
                .collect(),
        };
        Ok(serde_json::to_vec(&record)?)
    }

    /// Encrypt this key set under the root bundle derived from `master_key`.
    pub fn seal(&self, master_key: &MasterKey) -> Result<EncryptedPayload> {
        let root = derive_root_bundle(master_key)?;
        let mut cleartext = self.to_cleartext()?;
        let sealed = EncryptedPayload::seal(&root, &cleartext);
        cleartext.zeroize();
        sealed
    }

    /// Verify and decrypt a keys payload with the root bundle derived from
    /// `master_key`.
    ///
    /// # Errors
    /// - `Error::IntegrityCheck` if the payload was not produced under this master key
    /// - `Error::Crypto` for malformed payloads or key material
    pub fn open(master_key: &MasterKey, payload: &EncryptedPayload) -> Result<Self> {
        let root = derive_root_bundle(master_key)?;
        let mut cleartext = payload.open(&root)?;
        let keys = Self::from_cleartext(&cleartext);
        cleartext.zeroize();
        keys
    }
}

impl fmt::Debug for CollectionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionKeys")
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
