//! BISECT.TRACE Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Identifiers, hashes and scalar values shared by every stage of the
//! divergence pipeline.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod hash;
pub mod id;
pub mod value;

// Re-exports
pub use hash::{HashError, TraceHash};
pub use id::{CheckpointId, EntityKey, NodeKey, Phase};
pub use value::ScalarValue;
