//! Bootstrap state machine.

use std::fmt;

use crate::error::ErrorKind;

/// Stage of the engine bootstrap.
///
/// Stages advance strictly in declaration order; any stage may end in
/// `Failed`, after which the next bootstrap attempt starts over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootstrapState {
    #[default]
    Uninitialized,
    DerivingClientState,
    SyncingMeta,
    ValidatingStorageVersion,
    FetchingKeys,
    DecryptingKeys,
    Ready,
    Failed(ErrorKind),
}

impl BootstrapState {
    pub fn is_ready(&self) -> bool {
        matches!(self, BootstrapState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BootstrapState::Failed(_))
    }

    /// Whether a bootstrap attempt is under way.
    pub fn in_progress(&self) -> bool {
        !matches!(
            self,
            BootstrapState::Uninitialized | BootstrapState::Ready | BootstrapState::Failed(_)
        )
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapState::Uninitialized => f.write_str("uninitialized"),
            BootstrapState::DerivingClientState => f.write_str("deriving client state"),
            BootstrapState::SyncingMeta => f.write_str("syncing meta"),
            BootstrapState::ValidatingStorageVersion => f.write_str("validating storage version"),
            BootstrapState::FetchingKeys => f.write_str("fetching keys"),
            BootstrapState::DecryptingKeys => f.write_str("decrypting keys"),
            BootstrapState::Ready => f.write_str("ready"),
            BootstrapState::Failed(kind) => write!(f, "failed ({})", kind),
        }
    }
}
