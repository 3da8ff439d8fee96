//! BISECT.TRACE Replay
//!
//! Folds checkpoint events into per-entity traces and walks them against a
//! pipeline schema, recording a row for every visited node and the first
//! node at which the probe phase departs from the reference phase.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compare;
pub mod correlate;
pub mod stats;
pub mod trace;
pub mod walker;

pub use compare::{Comparison, Outcome, SampleDiff, evaluate, sample_diff};
pub use correlate::{Correlation, Correlator};
pub use stats::{CheckpointSummary, StatsCollector};
pub use trace::EntityTrace;
pub use walker::{EntityWalk, FirstDivergence, PipelineWalker, WalkRow};
