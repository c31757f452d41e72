//! Key derivation from the account master key.
//!
//! Two values are derived from kB: the client-state id (a truncated
//! SHA-256 digest, public) and the root key bundle (HKDF-SHA256, secret)
//! that protects the `crypto/keys` record.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::keys::{KeyBundle, MasterKey, KEY_LENGTH};
use syncto_common::{ClientStateId, Error, Result};

/// Number of digest bytes kept for the client-state id.
pub const CLIENT_STATE_BYTES: usize = 16;

/// HKDF info string for the root sync key bundle.
pub const SYNC_KEY_INFO: &[u8] = b"identity.mozilla.com/picl/v1/oldsync";

/// Derive the client-state id from the master key.
///
/// # Postconditions
/// - Returns 32 lowercase hex characters
/// - The result is deterministic for a given master key
pub fn client_state(master_key: &MasterKey) -> Result<ClientStateId> {
    let digest = Sha256::digest(master_key.as_bytes());
    ClientStateId::new(hex::encode(&digest[..CLIENT_STATE_BYTES]))
}

/// Expand the master key into the root key bundle.
///
/// # Security
/// - Intermediate key material is zeroized before returning
pub fn derive_root_bundle(master_key: &MasterKey) -> Result<KeyBundle> {
    let hk = Hkdf::<Sha256>::new(None, master_key.as_bytes());

    let mut okm = [0u8; 2 * KEY_LENGTH];
    hk.expand(SYNC_KEY_INFO, &mut okm)
        .map_err(|e| Error::Crypto(format!("Key expansion failed: {}", e)))?;

    let mut enc_key = [0u8; KEY_LENGTH];
    let mut hmac_key = [0u8; KEY_LENGTH];
    enc_key.copy_from_slice(&okm[..KEY_LENGTH]);
    hmac_key.copy_from_slice(&okm[KEY_LENGTH..]);
    okm.zeroize();

    Ok(KeyBundle::from_bytes(enc_key, hmac_key))
}
