//! Common error types for syncto.

use thiserror::Error;

/// Top-level error type for operations below the sync engine boundary.
///
/// The engine reclassifies every one of these into its own four-kind
/// taxonomy before handing it to a caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Key material failed its integrity check against the master key.
    #[error("Integrity check failed: {0}")]
    IntegrityCheck(String),

    /// Local record store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The remote could not be reached at all.
    #[error("Network error: {0}")]
    Network(String),

    /// A value did not have the shape the store contract requires.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
}

impl Error {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error reports a locally absent record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
