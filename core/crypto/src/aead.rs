//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! Record envelopes carry their nonce separately (the `IV` field), so this
//! module only exposes the explicit-nonce variants.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use syncto_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Generate a random nonce.
///
/// 24-byte nonces are safe to draw at random for the lifetime of a key.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let mut out = [0u8; NONCE_SIZE];
    out.copy_from_slice(&nonce);
    out
}

/// Encrypt plaintext with a specific nonce.
///
/// # Preconditions
/// - `key` must be exactly KEY_LENGTH bytes
/// - `nonce` must never be reused with the same key
///
/// # Postconditions
/// - Returns ciphertext || tag
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if encryption fails
pub fn encrypt_with_nonce(
    key: &[u8],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    check_key(key)?;

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key));
    let nonce_array = GenericArray::from_slice(nonce);

    cipher
        .encrypt(nonce_array, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

/// Decrypt ciphertext with a specific nonce.
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if ciphertext is shorter than a tag
/// - Returns error if authentication fails (tampered data or wrong key)
pub fn decrypt_with_nonce(
    key: &[u8],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    check_key(key)?;

    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Crypto("Ciphertext too short".to_string()));
    }

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key));
    let nonce_array = GenericArray::from_slice(nonce);

    cipher
        .decrypt(nonce_array, ciphertext)
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(())
}
