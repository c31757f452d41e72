//! Record id generation and validation.

use base64::{engine::general_purpose::URL_SAFE, Engine};

/// Generates and validates record ids for a collection.
pub trait IdSchema: Send + Sync {
    /// Produce an id for a record created without one.
    fn generate(&self) -> String;

    /// Whether `id` is acceptable for this collection.
    fn validate(&self, id: &str) -> bool;
}

/// Permissive schema: any id is accepted, including the empty string.
///
/// Generated ids are 12 url-safe base64 characters, the shape used by
/// Sync clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyId;

impl IdSchema for AnyId {
    fn generate(&self) -> String {
        URL_SAFE.encode(rand::random::<[u8; 9]>())
    }

    fn validate(&self, _id: &str) -> bool {
        true
    }
}

/// Schema pinned to a single id, for singleton control records.
#[derive(Debug, Clone)]
pub struct FixedId(String);

impl FixedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl IdSchema for FixedId {
    fn generate(&self) -> String {
        self.0.clone()
    }

    fn validate(&self, id: &str) -> bool {
        id == self.0
    }
}
