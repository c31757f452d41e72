//! Encryption transformer wiring a `RecordCipher` into collection sync.

use serde_json::{json, Value};
use std::sync::Arc;

use syncto_common::{Error, Result};
use syncto_crypto::{EncryptedPayload, RecordCipher};
use syncto_storage::{Record, RemoteTransformer};

/// Encrypts outgoing records and decrypts incoming ones for one collection.
///
/// Remote records carry the envelope as a JSON string payload. The
/// cleartext is the record object itself, including its `id`; a
/// tombstone is `{"id": ..., "deleted": true}`.
pub struct CryptoTransformer {
    cipher: Arc<dyn RecordCipher>,
    collection: String,
}

impl CryptoTransformer {
    pub fn new(cipher: Arc<dyn RecordCipher>, collection: impl Into<String>) -> Self {
        Self {
            cipher,
            collection: collection.into(),
        }
    }
}

impl RemoteTransformer for CryptoTransformer {
    fn encode(&self, record: Record) -> Result<Record> {
        let cleartext = if record.deleted {
            json!({ "id": record.id, "deleted": true })
        } else {
            let mut object = record.payload.as_object().cloned().ok_or_else(|| {
                Error::TypeMismatch(format!("Record {} payload is not an object", record.id))
            })?;
            object.insert("id".to_string(), Value::String(record.id.clone()));
            Value::Object(object)
        };

        let envelope = self.cipher.encrypt(&cleartext, &self.collection)?;
        Ok(Record {
            deleted: false,
            payload: Value::String(envelope.to_json()?),
            ..record
        })
    }

    fn decode(&self, record: Record) -> Result<Record> {
        // Server-side tombstones carry no payload.
        if record.deleted && record.payload.is_null() {
            return Ok(record);
        }

        let envelope = EncryptedPayload::from_json(record.payload_str()?)?;
        let cleartext = self.cipher.decrypt(&envelope, &self.collection)?;

        let object = cleartext.as_object().ok_or_else(|| {
            Error::TypeMismatch(format!("Record {} cleartext is not an object", record.id))
        })?;
        if let Some(id) = object.get("id").and_then(Value::as_str) {
            if id != record.id {
                return Err(Error::Crypto(format!(
                    "Record {} decrypted to a record with id {}",
                    record.id, id
                )));
            }
        }
        let deleted = object
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Record {
            deleted,
            payload: cleartext,
            ..record
        })
    }
}
