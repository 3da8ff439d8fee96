//! Aggregate counters.
//!
//! Summaries are plain counters in ordered maps, so merging is associative
//! and commutative and the rendered order never depends on worker timing.

use bisect_log::LoadStats;
use bisect_policy::DivergenceReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reports produced from one input source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    /// Source path or label
    pub source: String,
    /// Sweep experiment tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<String>,
    /// Sweep variant tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// False if the source did not exist
    pub found: bool,
    /// Read failure that made an existing source unusable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Loader counters
    pub load: LoadStats,
    /// One report per entity, in first-seen order
    pub reports: Vec<DivergenceReport>,
}

impl SourceReport {
    /// Create an empty report for a source
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            experiment: None,
            variant: None,
            found: true,
            error: None,
            load: LoadStats::default(),
            reports: Vec::new(),
        }
    }

    /// Report for a source that does not exist
    #[must_use]
    pub fn missing(source: impl Into<String>) -> Self {
        Self {
            found: false,
            ..Self::new(source)
        }
    }

    /// Report for a source that exists but could not be read
    #[must_use]
    pub fn unreadable(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(source)
        }
    }

    /// True if the source existed and was read to the end
    #[must_use]
    pub fn usable(&self) -> bool {
        self.found && self.error.is_none()
    }

    /// Summary of this source alone
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary::from_reports(&self.reports)
    }
}

/// PASS/FAIL/INCOMPLETE counts and histograms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Entities reported
    pub entities: u64,
    /// Complete entities with no divergence
    pub pass: u64,
    /// Complete entities with a divergence
    pub fail: u64,
    /// Entities missing a required phase
    pub incomplete: u64,
    /// Rows evaluated
    pub rows: u64,
    /// Rows with an undetermined outcome
    pub undetermined: u64,
    /// Failed entities per verdict label
    pub causes: BTreeMap<String, u64>,
    /// Failed entities per first-divergence node
    pub first_checkpoints: BTreeMap<String, u64>,
    /// Entities per sentinel flag raised
    pub flags: BTreeMap<String, u64>,
}

impl Summary {
    /// Create an empty summary
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Summarize a set of reports
    #[must_use]
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a DivergenceReport>) -> Self {
        let mut summary = Self::new();
        for report in reports {
            summary.add(report);
        }
        summary
    }

    /// Count one report
    pub fn add(&mut self, report: &DivergenceReport) {
        self.entities += 1;
        self.rows += report.rows.len() as u64;
        self.undetermined += report
            .rows
            .iter()
            .filter(|r| r.outcome() == bisect_replay::Outcome::Undetermined)
            .count() as u64;

        if !report.complete {
            self.incomplete += 1;
        } else if let Some(first) = &report.first_divergence {
            self.fail += 1;
            *self.causes.entry(report.verdict.clone()).or_default() += 1;
            *self
                .first_checkpoints
                .entry(first.node_key().to_string())
                .or_default() += 1;
        } else {
            self.pass += 1;
        }

        for flag in report.flags() {
            *self.flags.entry(flag.to_string()).or_default() += 1;
        }
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &Summary) {
        self.entities += other.entities;
        self.pass += other.pass;
        self.fail += other.fail;
        self.incomplete += other.incomplete;
        self.rows += other.rows;
        self.undetermined += other.undetermined;
        for (map, theirs) in [
            (&mut self.causes, &other.causes),
            (&mut self.first_checkpoints, &other.first_checkpoints),
            (&mut self.flags, &other.flags),
        ] {
            for (key, count) in theirs {
                *map.entry(key.clone()).or_default() += count;
            }
        }
    }

    /// Most frequent cause label; ties go to the label sorting first
    #[must_use]
    pub fn primary_cause(&self) -> Option<(&str, u64)> {
        let mut best: Option<(&str, u64)> = None;
        for (label, count) in &self.causes {
            if best.is_none_or(|(_, top)| *count > top) {
                best = Some((label.as_str(), *count));
            }
        }
        best
    }

    /// Cause labels sorted by descending count, then label
    #[must_use]
    pub fn causes_by_count(&self) -> Vec<(&str, u64)> {
        sorted_by_count(&self.causes)
    }

    /// First-divergence nodes sorted by descending count, then name
    #[must_use]
    pub fn first_checkpoints_by_count(&self) -> Vec<(&str, u64)> {
        sorted_by_count(&self.first_checkpoints)
    }
}

fn sorted_by_count(map: &BTreeMap<String, u64>) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries
}
