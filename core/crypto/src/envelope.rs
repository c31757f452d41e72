//! Encrypted record envelope.
//!
//! Wire shape: `{"ciphertext": base64, "IV": base64, "hmac": hex}`. The HMAC
//! is computed over the base64 ciphertext string and is checked before any
//! decryption is attempted.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::aead::{decrypt_with_nonce, encrypt_with_nonce, generate_nonce, NONCE_SIZE};
use crate::keys::KeyBundle;
use syncto_common::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Authenticated, encrypted payload as stored on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 ciphertext (with AEAD tag).
    pub ciphertext: String,
    /// Base64 nonce.
    #[serde(rename = "IV")]
    pub iv: String,
    /// Hex HMAC-SHA256 of `ciphertext`.
    pub hmac: String,
}

impl EncryptedPayload {
    /// Encrypt `plaintext` under `bundle`.
    ///
    /// # Postconditions
    /// - A fresh random IV is used for every call
    pub fn seal(bundle: &KeyBundle, plaintext: &[u8]) -> Result<Self> {
        let nonce = generate_nonce();
        let ciphertext = STANDARD.encode(encrypt_with_nonce(bundle.enc_key(), &nonce, plaintext)?);
        let hmac = hex::encode(compute_hmac(bundle, &ciphertext)?);

        Ok(Self {
            ciphertext,
            iv: STANDARD.encode(nonce),
            hmac,
        })
    }

    /// Check the HMAC against `bundle` in constant time.
    ///
    /// # Errors
    /// - `Error::IntegrityCheck` on any mismatch, including a malformed hmac field
    pub fn verify(&self, bundle: &KeyBundle) -> Result<()> {
        let expected = compute_hmac(bundle, &self.ciphertext)?;
        let given = hex::decode(&self.hmac)
            .map_err(|_| Error::IntegrityCheck("HMAC is not valid hex".to_string()))?;

        if bool::from(expected.as_slice().ct_eq(given.as_slice())) {
            Ok(())
        } else {
            Err(Error::IntegrityCheck("HMAC mismatch".to_string()))
        }
    }

    /// Verify and decrypt with `bundle`.
    pub fn open(&self, bundle: &KeyBundle) -> Result<Vec<u8>> {
        self.verify(bundle)?;

        let iv = STANDARD
            .decode(&self.iv)
            .map_err(|e| Error::Crypto(format!("Invalid IV encoding: {}", e)))?;
        let nonce: [u8; NONCE_SIZE] = iv.as_slice().try_into().map_err(|_| {
            Error::Crypto(format!(
                "Invalid IV length: expected {}, got {}",
                NONCE_SIZE,
                iv.len()
            ))
        })?;
        let ciphertext = STANDARD
            .decode(&self.ciphertext)
            .map_err(|e| Error::Crypto(format!("Invalid ciphertext encoding: {}", e)))?;

        decrypt_with_nonce(bundle.enc_key(), &nonce, &ciphertext)
    }

    /// Parse an envelope from its JSON string form.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to the JSON string form stored in a record payload.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn compute_hmac(bundle: &KeyBundle, ciphertext: &str) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(bundle.hmac_key())
        .map_err(|e| Error::Crypto(format!("Invalid HMAC key: {}", e)))?;
    mac.update(ciphertext.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let bundle = KeyBundle::generate();
        let payload = EncryptedPayload::seal(&bundle, br#"{"id":"abc"}"#).unwrap();

        assert_eq!(payload.open(&bundle).unwrap(), br#"{"id":"abc"}"#);
    }

    #[test]
    fn test_json_field_names() {
        let bundle = KeyBundle::generate();
        let payload = EncryptedPayload::seal(&bundle, b"x").unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();

        assert!(json.get("ciphertext").is_some());
        assert!(json.get("IV").is_some());
        assert_eq!(json["hmac"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_wrong_bundle_fails_integrity() {
        let payload = EncryptedPayload::seal(&KeyBundle::generate(), b"secret").unwrap();
        let result = payload.open(&KeyBundle::generate());

        assert!(matches!(result, Err(Error::IntegrityCheck(_))));
    }

    #[test]
    fn test_tampered_hmac_fails_integrity() {
        let bundle = KeyBundle::generate();
        let mut payload = EncryptedPayload::seal(&bundle, b"secret").unwrap();
        payload.hmac = "01a816e4577c6cf3f97b66b4382d0a3e7e9178c75a3d38ed9ac8ad6397c2ecce".to_string();

        assert!(matches!(payload.verify(&bundle), Err(Error::IntegrityCheck(_))));
    }

    #[test]
    fn test_non_hex_hmac_fails_integrity() {
        let bundle = KeyBundle::generate();
        let mut payload = EncryptedPayload::seal(&bundle, b"secret").unwrap();
        payload.hmac = "whoopsie!".to_string();

        assert!(matches!(payload.open(&bundle), Err(Error::IntegrityCheck(_))));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            EncryptedPayload::from_json("whoopsie!"),
            Err(Error::Serialization(_))
        ));
        assert!(EncryptedPayload::from_json(r#"{"ciphertext": "deadbeef"}"#).is_err());
    }
}
