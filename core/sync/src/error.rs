//! Error taxonomy exposed by the sync engine.
//!
//! Every failure crossing the engine boundary is one of four kinds. The
//! kind tells the caller what to do next: give up, retry later,
//! re-authenticate, or run first-time account setup.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use syncto_common::Error;

/// Tag identifying the kind of a `SyncError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Protocol or data-integrity violation; do not retry.
    Unrecoverable,
    /// Transient condition; the whole sync may be retried later.
    TryLater,
    /// Credentials rejected; re-authenticate before retrying.
    Auth,
    /// The account has never been synced by any client.
    InvalidAccount,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unrecoverable => "unrecoverable",
            ErrorKind::TryLater => "try later",
            ErrorKind::Auth => "auth",
            ErrorKind::InvalidAccount => "invalid account",
        };
        f.write_str(name)
    }
}

/// Classified sync failure.
///
/// Clonable so a single bootstrap failure can be reported to every caller
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Unrecoverable sync error{}: {source}", scope(.collection))]
    Unrecoverable {
        collection: Option<String>,
        source: Arc<Error>,
    },

    #[error("Sync failed, try again later{}: {source}", scope(.collection))]
    TryLater {
        collection: Option<String>,
        status: Option<u16>,
        source: Arc<Error>,
    },

    #[error("Sync credentials rejected{}: {source}", scope(.collection))]
    Auth {
        collection: Option<String>,
        source: Arc<Error>,
    },

    #[error("Invalid sync account: {reason}")]
    InvalidAccount { reason: String },
}

fn scope(collection: &Option<String>) -> String {
    match collection {
        Some(name) => format!(" in {}", name),
        None => String::new(),
    }
}

impl SyncError {
    /// Classify a store, crypto or adapter error.
    ///
    /// HTTP 401 is an auth failure, any other HTTP status and network
    /// failures are transient, everything else is unrecoverable.
    pub fn classify(error: Error) -> Self {
        match error {
            Error::Http { status: 401, .. } => SyncError::Auth {
                collection: None,
                source: Arc::new(error),
            },
            Error::Http { status, .. } => SyncError::TryLater {
                collection: None,
                status: Some(status),
                source: Arc::new(error),
            },
            Error::Network(_) => SyncError::TryLater {
                collection: None,
                status: None,
                source: Arc::new(error),
            },
            other => SyncError::unrecoverable(other),
        }
    }

    /// Wrap `error` as unrecoverable regardless of its shape.
    pub fn unrecoverable(error: Error) -> Self {
        SyncError::Unrecoverable {
            collection: None,
            source: Arc::new(error),
        }
    }

    pub fn invalid_account(reason: impl Into<String>) -> Self {
        SyncError::InvalidAccount {
            reason: reason.into(),
        }
    }

    /// Attach the collection the failure happened in, unless already set.
    pub fn in_collection(mut self, name: &str) -> Self {
        match &mut self {
            SyncError::Unrecoverable { collection, .. }
            | SyncError::TryLater { collection, .. }
            | SyncError::Auth { collection, .. } => {
                collection.get_or_insert_with(|| name.to_string());
            }
            SyncError::InvalidAccount { .. } => {}
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Unrecoverable { .. } => ErrorKind::Unrecoverable,
            SyncError::TryLater { .. } => ErrorKind::TryLater,
            SyncError::Auth { .. } => ErrorKind::Auth,
            SyncError::InvalidAccount { .. } => ErrorKind::InvalidAccount,
        }
    }

    /// Check if the caller may retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TryLater { .. })
    }

    /// Collection the failure happened in, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            SyncError::Unrecoverable { collection, .. }
            | SyncError::TryLater { collection, .. }
            | SyncError::Auth { collection, .. } => collection.as_deref(),
            SyncError::InvalidAccount { .. } => None,
        }
    }

    /// HTTP status carried by the original failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::TryLater { status, .. } => *status,
            SyncError::Auth { source, .. } | SyncError::Unrecoverable { source, .. } => {
                source.status()
            }
            SyncError::InvalidAccount { .. } => None,
        }
    }

    /// The original failure, if any.
    pub fn cause(&self) -> Option<&Error> {
        match self {
            SyncError::Unrecoverable { source, .. }
            | SyncError::TryLater { source, .. }
            | SyncError::Auth { source, .. } => Some(source),
            SyncError::InvalidAccount { .. } => None,
        }
    }
}

impl From<Error> for SyncError {
    fn from(error: Error) -> Self {
        SyncError::classify(error)
    }
}
