//! BISECT.TRACE Event Log
//!
//! Typed checkpoint events and a tolerant, line-at-a-time loader for
//! newline-delimited JSON traces. A malformed line is dropped and counted;
//! only I/O failure on an existing source is an error.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decode;
pub mod event;
pub mod stream;

pub use decode::{DecodeError, Decoded, FieldMap, LineDecoder};
pub use event::{CheckpointEvent, SampleStats};
pub use stream::{LoadError, LoadStats, TraceLoader};
