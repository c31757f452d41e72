//! Cryptographic primitives for syncto.
//!
//! This module provides:
//! - Client-state derivation from the account master key (kB)
//! - HKDF expansion of kB into the root key bundle
//! - Authenticated record envelopes (XChaCha20-Poly1305 + HMAC-SHA256)
//! - The `RecordCipher` contract and its `SyncCrypto` implementation
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - HMAC verification uses constant-time comparison

pub mod aead;
pub mod cipher;
pub mod envelope;
pub mod kdf;
pub mod keys;

pub use cipher::{RecordCipher, SyncCrypto};
pub use envelope::EncryptedPayload;
pub use kdf::{client_state, derive_root_bundle};
pub use keys::{CollectionKeys, KeyBundle, MasterKey};
