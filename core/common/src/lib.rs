//! Common utilities and types shared across the syncto crates.
//!
//! This module provides the crate-internal error type and the identifiers
//! that cross crate boundaries (such as the client-state id).

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::ClientStateId;
