//! Generic record collection store for syncto.
//!
//! This module provides a local mirror of remote record collections with a
//! two-way sync primitive, plus a trait-based interface for the remote end
//! (an HTTP server or an in-memory stand-in).
//!
//! # Design Principles
//! - Remote isolation: no server-specific logic in collections
//! - Transparent transforms: records are encoded/decoded on the way out/in
//! - Unified error semantics: every remote reports through `syncto_common::Error`

pub mod collection;
pub mod http;
pub mod id_schema;
pub mod memory;
pub mod record;
pub mod remote;
pub mod store;
pub mod transformer;

pub use collection::{Collection, CollectionOptions, RecordStatus};
pub use http::HttpRemote;
pub use id_schema::{AnyId, FixedId, IdSchema};
pub use memory::{Failure, MemoryRemote};
pub use record::{Conflict, Record, SyncResult};
pub use remote::{PushOutcome, Remote, RemoteChanges};
pub use store::{RecordStore, StoreConfig};
pub use transformer::RemoteTransformer;
