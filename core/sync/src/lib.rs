//! syncto sync engine
//!
//! This module drives encrypted collection sync for one account:
//! - One-time bootstrap: client-state id, `meta/global` check, `crypto/keys` decryption
//! - Per-collection two-phase sync (pull, adapter update, conditional push)
//! - Conflict resolution delegated to caller-supplied adapters
//! - A closed error taxonomy telling callers whether and how to retry

pub mod adapter;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod registry;
pub mod state;
pub mod transformer;

// Re-export main types
pub use adapter::{SyncAdapter, SyncOptions};
pub use config::{EngineConfig, EngineOptions};
pub use control::{MetaGlobal, STORAGE_VERSION};
pub use engine::SyncEngine;
pub use error::{ErrorKind, SyncError};
pub use state::BootstrapState;
pub use transformer::CryptoTransformer;
