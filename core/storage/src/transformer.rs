//! Hooks applied to records crossing the local/remote boundary.

use crate::record::Record;
use syncto_common::Result;

/// Transforms records on their way to and from the remote.
///
/// A collection applies its transformers in order when encoding for
/// upload and in reverse order when decoding downloaded records.
pub trait RemoteTransformer: Send + Sync {
    /// Convert a local record to its remote form.
    fn encode(&self, record: Record) -> Result<Record>;

    /// Convert a remote record to its local form.
    fn decode(&self, record: Record) -> Result<Record>;
}
