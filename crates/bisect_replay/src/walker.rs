//! Pipeline walker.
//!
//! Walks one entity trace in schema order for each probe phase. Every node
//! present on at least one side yields a row. The first divergent row
//! settles the verdict; later rows are still produced for the audit trail.

use crate::compare::{Comparison, Outcome, evaluate};
use crate::trace::EntityTrace;
use bisect_core::{CheckpointId, EntityKey, NodeKey, Phase};
use bisect_plan::{DEFAULT_THRESHOLD, PhasePlan, PipelineSchema, PredicateSpec, SentinelSet};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// One evaluated node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkRow {
    /// Probe phase compared against the reference
    pub probe: Phase,
    /// Checkpoint
    pub checkpoint: CheckpointId,
    /// Layer, if any
    pub layer: Option<i64>,
    /// Predicate name
    pub predicate: String,
    /// Threshold applied, for numeric predicates
    pub threshold: Option<f64>,
    /// Comparison result
    #[serde(flatten)]
    pub comparison: Comparison,
    /// Sentinel flags raised by the probe event
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl WalkRow {
    /// Node address of this row
    #[must_use]
    pub fn node_key(&self) -> NodeKey {
        NodeKey::new(self.checkpoint.clone(), self.layer)
    }

    /// Outcome at this node
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.comparison.outcome
    }
}

/// The node that settled an entity's verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstDivergence {
    /// Probe phase in which it was found
    pub probe: Phase,
    /// Checkpoint
    pub checkpoint: CheckpointId,
    /// Layer, if any
    pub layer: Option<i64>,
    /// Diverged, or one of the missing outcomes
    pub outcome: Outcome,
    /// Mean absolute error at the node, if computed
    pub mae: Option<f64>,
    /// Maximum absolute error at the node, if computed
    pub max_abs: Option<f64>,
}

impl FirstDivergence {
    fn from_row(row: &WalkRow) -> Self {
        Self {
            probe: row.probe.clone(),
            checkpoint: row.checkpoint.clone(),
            layer: row.layer,
            outcome: row.comparison.outcome,
            mae: row.comparison.diff.map(|d| d.mae),
            max_abs: row.comparison.diff.map(|d| d.max_abs),
        }
    }

    /// True if the divergence is a node recorded on one side only
    #[must_use]
    pub fn is_missing_instrumentation(&self) -> bool {
        self.outcome.is_missing()
    }

    /// Node address
    #[must_use]
    pub fn node_key(&self) -> NodeKey {
        NodeKey::new(self.checkpoint.clone(), self.layer)
    }
}

/// Result of walking one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityWalk {
    /// Entity
    pub entity: EntityKey,
    /// Required phases the entity lacks; non-empty means incomplete
    pub missing_phases: Vec<Phase>,
    /// First divergence, if any
    pub first_divergence: Option<FirstDivergence>,
    /// Every evaluated node, in walk order
    pub rows: Vec<WalkRow>,
}

impl EntityWalk {
    /// True if every required phase was present
    #[must_use]
    pub fn complete(&self) -> bool {
        self.missing_phases.is_empty()
    }

    /// True if complete and no node diverged
    #[must_use]
    pub fn passed(&self) -> bool {
        self.complete() && self.first_divergence.is_none()
    }
}

/// Verdict search state for one entity
#[derive(Debug)]
enum WalkState {
    Scanning,
    Diverged(FirstDivergence),
}

impl WalkState {
    fn observe(&mut self, row: &WalkRow) {
        if matches!(self, Self::Scanning) && row.outcome().is_divergence() {
            *self = Self::Diverged(FirstDivergence::from_row(row));
        }
    }

    fn into_divergence(self) -> Option<FirstDivergence> {
        match self {
            Self::Scanning => None,
            Self::Diverged(first) => Some(first),
        }
    }
}

/// Node to visit, with its resolved predicate and threshold
type PlannedNode = (NodeKey, PredicateSpec, f64);

/// Walks entity traces against a schema
#[derive(Debug, Clone)]
pub struct PipelineWalker {
    schema: PipelineSchema,
    phases: PhasePlan,
    sentinels: SentinelSet,
    default_threshold: f64,
}

impl PipelineWalker {
    /// Create a walker
    #[must_use]
    pub fn new(schema: PipelineSchema, phases: PhasePlan) -> Self {
        Self {
            schema,
            phases,
            sentinels: SentinelSet::new(),
            default_threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Set sentinel flags evaluated on probe events
    #[must_use]
    pub fn with_sentinels(mut self, sentinels: SentinelSet) -> Self {
        self.sentinels = sentinels;
        self
    }

    /// Set the threshold used by nodes that declare none
    #[must_use]
    pub fn with_default_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// Schema in use
    #[must_use]
    pub fn schema(&self) -> &PipelineSchema {
        &self.schema
    }

    /// Phase plan in use
    #[must_use]
    pub fn phases(&self) -> &PhasePlan {
        &self.phases
    }

    /// Walk one entity
    #[must_use]
    pub fn walk(&self, trace: &EntityTrace) -> EntityWalk {
        let missing_phases = trace.missing_phases(&self.phases.required_phases());
        if !missing_phases.is_empty() {
            tracing::debug!(entity = %trace.entity(), missing = ?missing_phases, "entity incomplete");
            return EntityWalk {
                entity: trace.entity().clone(),
                missing_phases,
                first_divergence: None,
                rows: Vec::new(),
            };
        }

        let reference = &self.phases.reference;
        let mut state = WalkState::Scanning;
        let mut rows = Vec::new();

        for probe in &self.phases.probes {
            if !trace.has_phase(probe) {
                continue;
            }
            for (key, predicate, threshold) in self.plan(trace, probe) {
                let key = trace.resolve(reference, probe, &key);
                let ref_event = trace.get(reference, &key);
                let probe_event = trace.get(probe, &key);
                let comparison = match (ref_event, probe_event) {
                    (None, None) => continue,
                    (Some(a), Some(b)) => evaluate(&predicate, threshold, a, b),
                    (Some(_), None) => Comparison::missing(true),
                    (None, Some(_)) => Comparison::missing(false),
                };
                let flags = probe_event
                    .map(|e| self.sentinels.flags_for(e))
                    .unwrap_or_default();
                let row = WalkRow {
                    probe: probe.clone(),
                    checkpoint: key.checkpoint,
                    layer: key.layer,
                    predicate: predicate.name().to_string(),
                    threshold: predicate.uses_threshold().then_some(threshold),
                    comparison,
                    flags,
                };
                state.observe(&row);
                rows.push(row);
            }
        }

        let first_divergence = state.into_divergence();
        match &first_divergence {
            Some(first) => tracing::debug!(
                entity = %trace.entity(),
                node = %first.node_key(),
                outcome = first.outcome.label(),
                "first divergence"
            ),
            None => tracing::debug!(entity = %trace.entity(), rows = rows.len(), "entity passed"),
        }

        EntityWalk {
            entity: trace.entity().clone(),
            missing_phases,
            first_divergence,
            rows,
        }
    }

    /// Nodes to visit for one probe phase, in walk order
    fn plan(&self, trace: &EntityTrace, probe: &Phase) -> Vec<PlannedNode> {
        if !self.schema.discover {
            return self
                .schema
                .walk()
                .map(|(key, node)| {
                    (
                        key,
                        node.predicate.clone(),
                        node.threshold_or(self.default_threshold),
                    )
                })
                .collect();
        }

        // Reference order first, then nodes only the probe recorded
        let mut keys: IndexSet<&NodeKey> = trace.keys_in(&self.phases.reference).collect();
        keys.extend(trace.keys_in(probe));
        keys.into_iter()
            .map(|key| {
                let node = self.schema.node(&key.checkpoint);
                let predicate = node.map(|n| n.predicate.clone()).unwrap_or_default();
                let threshold = node.map_or(self.default_threshold, |n| {
                    n.threshold_or(self.default_threshold)
                });
                (key.clone(), predicate, threshold)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate::Correlator;
    use bisect_log::CheckpointEvent;
    use bisect_plan::{Sentinel, SchemaNode};

    fn hash_schema(points: &[&str]) -> PipelineSchema {
        PipelineSchema::new("t").with_nodes(points, PredicateSpec::Hash)
    }

    fn trace_of(events: Vec<CheckpointEvent>) -> EntityTrace {
        let mut result = Correlator::new().correlate(events);
        result.traces.swap_remove_index(0).unwrap().1
    }

    fn hashes(phase: &str, pairs: &[(&str, u64)]) -> Vec<CheckpointEvent> {
        pairs
            .iter()
            .map(|(p, h)| CheckpointEvent::new("e", phase, *p).with_hash(*h))
            .collect()
    }

    #[test]
    fn test_abc_scenario() {
        let mut events = hashes("reference", &[("A", 1), ("B", 2), ("C", 3)]);
        events.extend(hashes("probe", &[("A", 1), ("B", 9), ("C", 3)]));
        let walker = PipelineWalker::new(hash_schema(&["A", "B", "C"]), PhasePlan::default());
        let walk = walker.walk(&trace_of(events));

        let outcomes: Vec<(&str, Outcome)> = walk
            .rows
            .iter()
            .map(|r| (r.checkpoint.as_str(), r.outcome()))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("A", Outcome::Match),
                ("B", Outcome::Diverged),
                ("C", Outcome::Match)
            ]
        );
        let first = walk.first_divergence.unwrap();
        assert_eq!(first.checkpoint.as_str(), "B");
        assert!(!first.is_missing_instrumentation());
    }

    #[test]
    fn test_missing_reference_node_settles_verdict() {
        let mut events = hashes("reference", &[("A", 1), ("E", 5)]);
        events.extend(hashes("probe", &[("A", 1), ("D", 4), ("E", 6)]));
        let walker =
            PipelineWalker::new(hash_schema(&["A", "D", "E"]), PhasePlan::default());
        let walk = walker.walk(&trace_of(events));
        assert_eq!(walk.rows.len(), 3);
        assert_eq!(walk.rows[1].outcome(), Outcome::MissingReference);
        // E also differs, but D came first
        assert_eq!(walk.rows[2].outcome(), Outcome::Diverged);
        let first = walk.first_divergence.unwrap();
        assert_eq!(first.checkpoint.as_str(), "D");
        assert!(first.is_missing_instrumentation());
    }

    #[test]
    fn test_node_absent_on_both_sides_has_no_row() {
        let mut events = hashes("reference", &[("A", 1)]);
        events.extend(hashes("probe", &[("A", 1)]));
        let walker = PipelineWalker::new(hash_schema(&["A", "Z"]), PhasePlan::default());
        let walk = walker.walk(&trace_of(events));
        assert_eq!(walk.rows.len(), 1);
        assert!(walk.passed());
    }

    #[test]
    fn test_reference_only_entity_is_incomplete() {
        let events = hashes("reference", &[("A", 1), ("B", 2)]);
        let walker = PipelineWalker::new(hash_schema(&["A", "B"]), PhasePlan::default());
        let walk = walker.walk(&trace_of(events));
        assert!(!walk.complete());
        assert_eq!(walk.missing_phases, vec![Phase::probe()]);
        assert!(walk.rows.is_empty());
        assert!(walk.first_divergence.is_none());
        assert!(!walk.passed());
    }

    #[test]
    fn test_undetermined_never_diverges() {
        let events = vec![
            CheckpointEvent::new("e", "reference", "A").with_sample(vec![]),
            CheckpointEvent::new("e", "probe", "A"),
        ];
        let schema = PipelineSchema::new("t").with_nodes(&["A"], PredicateSpec::Numeric);
        let walk = PipelineWalker::new(schema, PhasePlan::default()).walk(&trace_of(events));
        assert_eq!(walk.rows[0].outcome(), Outcome::Undetermined);
        assert!(walk.passed());
    }

    #[test]
    fn test_layered_walk_and_thresholds() {
        let schema = PipelineSchema::new("t")
            .with_layers(vec![0, 1])
            .with_node(SchemaNode::new("x").with_predicate(PredicateSpec::Numeric))
            .with_node(
                SchemaNode::new("y")
                    .with_predicate(PredicateSpec::Numeric)
                    .with_threshold(0.5),
            );
        let events = vec![
            CheckpointEvent::new("e", "reference", "x").with_layer(0).with_sample(vec![1.0]),
            CheckpointEvent::new("e", "probe", "x").with_layer(0).with_sample(vec![1.0]),
            CheckpointEvent::new("e", "reference", "y").with_layer(0).with_sample(vec![1.0]),
            CheckpointEvent::new("e", "probe", "y").with_layer(0).with_sample(vec![1.25]),
            CheckpointEvent::new("e", "reference", "x").with_layer(1).with_sample(vec![1.0]),
            CheckpointEvent::new("e", "probe", "x").with_layer(1).with_sample(vec![1.1]),
        ];
        let walk = PipelineWalker::new(schema, PhasePlan::default())
            .with_default_threshold(0.01)
            .walk(&trace_of(events));
        let keys: Vec<String> = walk.rows.iter().map(|r| r.node_key().to_string()).collect();
        assert_eq!(keys, vec!["x@L0", "y@L0", "x@L1"]);
        assert_eq!(walk.rows[1].threshold, Some(0.5));
        assert_eq!(walk.rows[1].outcome(), Outcome::Match);
        let first = walk.first_divergence.unwrap();
        assert_eq!(first.node_key().to_string(), "x@L1");
        assert!(first.mae.unwrap() > 0.01);
    }

    #[test]
    fn test_unlayered_node_compares_one_layer() {
        let events = vec![
            CheckpointEvent::new("e", "reference", "x").with_layer(0).with_hash(10),
            CheckpointEvent::new("e", "reference", "x").with_layer(1).with_hash(11),
            CheckpointEvent::new("e", "probe", "x").with_layer(0).with_hash(10),
        ];
        let walker = PipelineWalker::new(hash_schema(&["x"]), PhasePlan::default());
        let walk = walker.walk(&trace_of(events));
        assert_eq!(walk.rows.len(), 1);
        assert_eq!(walk.rows[0].layer, Some(1));
        assert_eq!(walk.rows[0].outcome(), Outcome::MissingProbe);
        let first = walk.first_divergence.unwrap();
        assert_eq!(first.node_key().to_string(), "x@L1");
        assert!(first.is_missing_instrumentation());
    }

    #[test]
    fn test_multiple_probes_in_order() {
        let mut events = hashes("r", &[("A", 1), ("B", 2)]);
        events.extend(hashes("p1", &[("A", 1), ("B", 2)]));
        events.extend(hashes("p2", &[("A", 8), ("B", 2)]));
        let phases = PhasePlan::pair("r", "p1").with_probe("p2");
        let walk = PipelineWalker::new(hash_schema(&["A", "B"]), phases).walk(&trace_of(events));
        assert_eq!(walk.rows.len(), 4);
        let first = walk.first_divergence.unwrap();
        assert_eq!(first.probe.as_str(), "p2");
        assert_eq!(first.checkpoint.as_str(), "A");
    }

    #[test]
    fn test_optional_probe_skipped() {
        let mut events = hashes("r", &[("A", 1)]);
        events.extend(hashes("p1", &[("A", 1)]));
        let phases = PhasePlan::pair("r", "p1")
            .with_probe("p2")
            .with_required(vec![Phase::new("r"), Phase::new("p1")]);
        let walk = PipelineWalker::new(hash_schema(&["A"]), phases).walk(&trace_of(events));
        assert!(walk.passed());
        assert_eq!(walk.rows.len(), 1);
    }

    #[test]
    fn test_discover_mode_uses_reference_order() {
        let mut events = hashes("reference", &[("c", 1), ("a", 2)]);
        events.extend(hashes("probe", &[("a", 2), ("c", 1), ("z", 3)]));
        let walker = PipelineWalker::new(PipelineSchema::discovering("g"), PhasePlan::default());
        let walk = walker.walk(&trace_of(events));
        let order: Vec<&str> = walk.rows.iter().map(|r| r.checkpoint.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "z"]);
        assert_eq!(walk.first_divergence.unwrap().checkpoint.as_str(), "z");
    }

    #[test]
    fn test_sentinel_flags_do_not_change_outcome() {
        let predicate = PredicateSpec::Categorical {
            field: "top1_id".to_string(),
        };
        let schema = PipelineSchema::new("t").with_node(SchemaNode::new("logits").with_predicate(predicate));
        let events = vec![
            CheckpointEvent::new("e", "reference", "logits").with_scalar("top1_id", 96965_i64),
            CheckpointEvent::new("e", "probe", "logits").with_scalar("top1_id", 96965_i64),
        ];
        let sentinels = SentinelSet::new().with(Sentinel::new("collapse", "top1_id", 96965_i64));
        let walk = PipelineWalker::new(schema, PhasePlan::default())
            .with_sentinels(sentinels)
            .walk(&trace_of(events));
        assert_eq!(walk.rows[0].flags, vec!["collapse".to_string()]);
        assert!(walk.passed());
    }

    #[test]
    fn test_row_serializes_flat() {
        let mut events = hashes("reference", &[("A", 1)]);
        events.extend(hashes("probe", &[("A", 2)]));
        let walk = PipelineWalker::new(hash_schema(&["A"]), PhasePlan::default())
            .walk(&trace_of(events));
        let json = serde_json::to_value(&walk.rows[0]).unwrap();
        assert_eq!(json["outcome"], "diverged");
        assert_eq!(json["hash_equal"], false);
        assert!(json.get("flags").is_none());
    }

    proptest::proptest! {
        #[test]
        fn prop_first_divergence_is_the_single_differing_node(
            len in 1usize..12,
            pick in 0usize..12,
        ) {
            let k = pick % len;
            let names: Vec<String> = (0..len).map(|i| format!("n{}", i)).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let mut events = Vec::new();
            for (i, name) in refs.iter().enumerate() {
                events.push(CheckpointEvent::new("e", "reference", *name).with_hash(i as u64));
                let probe_hash = if i == k { 1000 + i as u64 } else { i as u64 };
                events.push(CheckpointEvent::new("e", "probe", *name).with_hash(probe_hash));
            }
            let walk = PipelineWalker::new(hash_schema(&refs), PhasePlan::default())
                .walk(&trace_of(events));
            proptest::prop_assert_eq!(walk.rows.len(), len);
            let first = walk.first_divergence.unwrap();
            proptest::prop_assert_eq!(first.checkpoint.as_str(), refs[k]);
        }

        #[test]
        fn prop_all_equal_passes(len in 1usize..12) {
            let names: Vec<String> = (0..len).map(|i| format!("n{}", i)).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let mut events = Vec::new();
            for (i, name) in refs.iter().enumerate() {
                events.push(CheckpointEvent::new("e", "reference", *name).with_hash(i as u64));
                events.push(CheckpointEvent::new("e", "probe", *name).with_hash(i as u64));
            }
            let walk = PipelineWalker::new(hash_schema(&refs), PhasePlan::default())
                .walk(&trace_of(events));
            proptest::prop_assert!(walk.passed());
        }
    }
}
