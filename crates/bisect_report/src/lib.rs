//! BISECT.TRACE Report
//!
//! Formats results already computed by the walker and classifier: per-entity
//! rows, PASS/FAIL totals with a cause histogram, and the best variant of a
//! sweep. Nothing here compares samples.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod render;
pub mod summary;
pub mod sweep;

pub use render::{AnalysisRun, Format, render, render_stats};
pub use summary::{SourceReport, Summary};
pub use sweep::{Candidate, FamilyMatch, FamilyPattern, SweepError, SweepMetric, argmin, select_best};
