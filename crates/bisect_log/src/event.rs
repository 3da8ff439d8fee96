//! Checkpoint events.
//!
//! One event is one checkpoint record emitted by one phase of the pipeline
//! for one entity. Events are created once at load time and never mutated.

use bisect_core::{CheckpointId, EntityKey, NodeKey, Phase, ScalarValue, TraceHash};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Summary statistics of the buffer behind a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Minimum element
    pub min: Option<f64>,
    /// Maximum element
    pub max: Option<f64>,
    /// Mean of elements
    pub mean: Option<f64>,
    /// Number of NaN elements
    pub nan_count: u64,
    /// Number of infinite elements
    pub inf_count: u64,
}

impl SampleStats {
    /// True if no statistic was recorded at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.is_none()
            && self.max.is_none()
            && self.mean.is_none()
            && self.nan_count == 0
            && self.inf_count == 0
    }
}

/// A single checkpoint record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEvent {
    /// Entity this checkpoint belongs to
    pub entity: EntityKey,
    /// Phase that produced it
    pub phase: Phase,
    /// Checkpoint identifier
    pub checkpoint: CheckpointId,
    /// Layer index
    pub layer: Option<i64>,
    /// Step index within the phase
    pub step: Option<i64>,
    /// Content hash of the checkpoint buffer
    pub hash: Option<TraceHash>,
    /// Ordered numeric sample of the checkpoint buffer
    pub sample: Option<Vec<f64>>,
    /// Summary statistics
    pub stats: Option<SampleStats>,
    /// Remaining named scalar fields, in trace order
    pub scalars: IndexMap<String, ScalarValue>,
}

impl CheckpointEvent {
    /// Create an event with only its identity
    #[must_use]
    pub fn new(
        entity: impl Into<EntityKey>,
        phase: impl Into<Phase>,
        checkpoint: impl Into<CheckpointId>,
    ) -> Self {
        Self {
            entity: entity.into(),
            phase: phase.into(),
            checkpoint: checkpoint.into(),
            layer: None,
            step: None,
            hash: None,
            sample: None,
            stats: None,
            scalars: IndexMap::new(),
        }
    }

    /// Set the layer
    #[must_use]
    pub fn with_layer(mut self, layer: i64) -> Self {
        self.layer = Some(layer);
        self
    }

    /// Set the step
    #[must_use]
    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Set the hash
    #[must_use]
    pub fn with_hash(mut self, hash: u64) -> Self {
        self.hash = Some(TraceHash::from_raw(hash));
        self
    }

    /// Set the sample
    #[must_use]
    pub fn with_sample(mut self, sample: Vec<f64>) -> Self {
        self.sample = Some(sample);
        self
    }

    /// Set the stats
    #[must_use]
    pub fn with_stats(mut self, stats: SampleStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Add a scalar field
    #[must_use]
    pub fn with_scalar(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.scalars.insert(name.into(), value.into());
        self
    }

    /// Copy of this event under another checkpoint id
    #[must_use]
    pub fn renamed(&self, checkpoint: CheckpointId) -> Self {
        Self {
            checkpoint,
            ..self.clone()
        }
    }

    /// Address of this event inside its phase
    #[must_use]
    pub fn node_key(&self) -> NodeKey {
        NodeKey::new(self.checkpoint.clone(), self.layer)
    }

    /// Look up a scalar field
    #[must_use]
    pub fn scalar(&self, name: &str) -> Option<&ScalarValue> {
        self.scalars.get(name)
    }

    /// Sample as a slice, empty if absent
    #[must_use]
    pub fn sample_slice(&self) -> &[f64] {
        self.sample.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = CheckpointEvent::new("p0", "reference", "attn_out")
            .with_layer(3)
            .with_hash(42)
            .with_sample(vec![1.0, 2.0])
            .with_scalar("top1_id", 7i64);

        assert_eq!(event.entity.as_str(), "p0");
        assert_eq!(event.node_key(), NodeKey::new("attn_out", Some(3)));
        assert_eq!(event.hash, Some(TraceHash::from_raw(42)));
        assert_eq!(event.sample_slice(), &[1.0, 2.0]);
        assert_eq!(event.scalar("top1_id"), Some(&ScalarValue::Int(7)));
    }

    #[test]
    fn test_renamed_keeps_payload() {
        let event = CheckpointEvent::new("p0", "probe", "final_norm").with_hash(9);
        let renamed = event.renamed(CheckpointId::new("final_rms"));
        assert_eq!(renamed.checkpoint.as_str(), "final_rms");
        assert_eq!(renamed.hash, event.hash);
        assert_eq!(event.checkpoint.as_str(), "final_norm");
    }

    #[test]
    fn test_sample_slice_absent() {
        let event = CheckpointEvent::new("p0", "probe", "x");
        assert!(event.sample_slice().is_empty());
    }

    #[test]
    fn test_stats_is_empty() {
        assert!(SampleStats::default().is_empty());
        let stats = SampleStats {
            nan_count: 1,
            ..Default::default()
        };
        assert!(!stats.is_empty());
    }
}
