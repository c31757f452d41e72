//! Common types used throughout syncto.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a client-state id in hex characters (16 digest bytes).
pub const CLIENT_STATE_LEN: usize = 32;

/// Deterministic per-account identifier derived from the master key.
///
/// Used as the local storage namespace and as the `X-Client-State`
/// protocol header value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientStateId(String);

impl ClientStateId {
    /// Create a ClientStateId from its hex form.
    ///
    /// # Preconditions
    /// - `id` must be exactly CLIENT_STATE_LEN lowercase hex characters
    ///
    /// # Errors
    /// - Returns error if the length or alphabet is wrong
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.len() != CLIENT_STATE_LEN {
            return Err(crate::Error::InvalidInput(format!(
                "Client state must be {} hex characters, got {}",
                CLIENT_STATE_LEN,
                id.len()
            )));
        }
        if !id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(crate::Error::InvalidInput(
                "Client state must be lowercase hex".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
