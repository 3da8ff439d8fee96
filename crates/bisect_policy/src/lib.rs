//! BISECT.TRACE Policy
//!
//! Maps a first-divergence checkpoint to a human-meaningful cause label.
//! Tables are data: supporting a new checkpoint family means adding rows,
//! never branches.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod matcher;
pub mod rules;

pub use classify::{Classifier, DivergenceReport};
pub use matcher::{CheckpointPattern, PatternError};
pub use rules::{
    INCOMPLETE, MISSING_INSTRUMENTATION, PASS, RootCauseRule, RootCauseTable, UNKNOWN,
    builtin_table,
};
