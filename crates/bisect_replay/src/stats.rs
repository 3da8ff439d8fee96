//! Checkpoint statistics summary.
//!
//! Aggregates every event of a single trace per `(layer, checkpoint)`
//! regardless of phase or entity. Used to spot checkpoints whose hash never
//! settles across decode steps, or whose buffers carry NaN or Inf.

use bisect_core::{CheckpointId, TraceHash};
use bisect_log::CheckpointEvent;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregated view of one checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// Layer, if any
    pub layer: Option<i64>,
    /// Checkpoint
    pub checkpoint: CheckpointId,
    /// Events aggregated
    pub events: u64,
    /// Distinct hash values
    pub distinct_hashes: usize,
    /// Hash constant from the second occurrence on (needs two or more hashes)
    pub const_after_first: bool,
    /// Minimum of recorded minimums
    pub min: Option<f64>,
    /// Maximum of recorded maximums
    pub max: Option<f64>,
    /// Mean of recorded means
    pub mean: Option<f64>,
    /// Total NaN count
    pub nan_count: u64,
    /// Total Inf count
    pub inf_count: u64,
}

#[derive(Debug, Default)]
struct Accumulator {
    events: u64,
    hashes: Vec<TraceHash>,
    min: Option<f64>,
    max: Option<f64>,
    mean_total: f64,
    means: u64,
    nan_count: u64,
    inf_count: u64,
}

impl Accumulator {
    fn add(&mut self, event: &CheckpointEvent) {
        self.events += 1;
        if let Some(hash) = event.hash {
            self.hashes.push(hash);
        }
        if let Some(stats) = &event.stats {
            if let Some(min) = stats.min {
                self.min = Some(self.min.map_or(min, |m| m.min(min)));
            }
            if let Some(max) = stats.max {
                self.max = Some(self.max.map_or(max, |m| m.max(max)));
            }
            if let Some(mean) = stats.mean {
                self.mean_total += mean;
                self.means += 1;
            }
            self.nan_count += stats.nan_count;
            self.inf_count += stats.inf_count;
        }
    }

    fn finish(self, layer: Option<i64>, checkpoint: CheckpointId) -> CheckpointSummary {
        let distinct: IndexSet<&TraceHash> = self.hashes.iter().collect();
        let const_after_first = self.hashes.len() > 1
            && self.hashes[1..].iter().all(|h| *h == self.hashes[1]);
        CheckpointSummary {
            layer,
            checkpoint,
            events: self.events,
            distinct_hashes: distinct.len(),
            const_after_first,
            min: self.min,
            max: self.max,
            mean: (self.means > 0).then(|| self.mean_total / self.means as f64),
            nan_count: self.nan_count,
            inf_count: self.inf_count,
        }
    }
}

/// Collects checkpoint summaries from an event stream
#[derive(Debug, Default)]
pub struct StatsCollector {
    entries: BTreeMap<(Option<i64>, CheckpointId), Accumulator>,
    max_step: Option<i64>,
}

impl StatsCollector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one event
    pub fn add(&mut self, event: &CheckpointEvent) {
        if let Some(step) = event.step {
            self.max_step = Some(self.max_step.map_or(step, |s| s.max(step)));
        }
        self.entries
            .entry((event.layer, event.checkpoint.clone()))
            .or_default()
            .add(event);
    }

    /// Number of steps seen, counted as highest step index plus one
    #[must_use]
    pub fn steps_seen(&self) -> u64 {
        self.max_step
            .filter(|s| *s >= 0)
            .map_or(0, |s| s as u64 + 1)
    }

    /// Summaries sorted by `(layer, checkpoint)`
    #[must_use]
    pub fn finish(self) -> Vec<CheckpointSummary> {
        self.entries
            .into_iter()
            .map(|((layer, checkpoint), acc)| acc.finish(layer, checkpoint))
            .collect()
    }
}

impl Extend<CheckpointEvent> for StatsCollector {
    fn extend<T: IntoIterator<Item = CheckpointEvent>>(&mut self, iter: T) {
        for event in iter {
            self.add(&event);
        }
    }
}
