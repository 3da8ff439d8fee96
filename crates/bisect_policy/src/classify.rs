//! Classification of walked entities into verdicts.

use crate::rules::{INCOMPLETE, MISSING_INSTRUMENTATION, PASS, RootCauseTable};
use bisect_core::{EntityKey, Phase};
use bisect_replay::{EntityWalk, FirstDivergence, WalkRow};
use serde::{Deserialize, Serialize};

/// Final per-entity result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceReport {
    /// Entity
    pub entity: EntityKey,
    /// Every required phase was present
    pub complete: bool,
    /// Required phases the entity lacks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_phases: Vec<Phase>,
    /// Node that settled the verdict
    pub first_divergence: Option<FirstDivergence>,
    /// `PASS`, `INCOMPLETE`, `missing-instrumentation` or a table label
    pub verdict: String,
    /// Table label for a missing-instrumentation node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspect: Option<String>,
    /// Every evaluated node
    pub rows: Vec<WalkRow>,
}

impl DivergenceReport {
    /// True for a complete entity with no divergence
    #[must_use]
    pub fn passed(&self) -> bool {
        self.complete && self.first_divergence.is_none()
    }

    /// True for a complete entity with a divergence
    #[must_use]
    pub fn failed(&self) -> bool {
        self.complete && self.first_divergence.is_some()
    }

    /// Sentinel flags raised anywhere in the walk, first-seen order
    #[must_use]
    pub fn flags(&self) -> Vec<&str> {
        let mut flags: Vec<&str> = Vec::new();
        for flag in self.rows.iter().flat_map(|r| r.flags.iter()) {
            if !flags.contains(&flag.as_str()) {
                flags.push(flag);
            }
        }
        flags
    }
}

/// Assigns verdict labels from a root-cause table
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    table: RootCauseTable,
}

impl Classifier {
    /// Create a classifier over a table
    #[must_use]
    pub fn new(table: RootCauseTable) -> Self {
        Self { table }
    }

    /// Table in use
    #[must_use]
    pub fn table(&self) -> &RootCauseTable {
        &self.table
    }

    /// Turn a walk into a report
    #[must_use]
    pub fn classify(&self, walk: EntityWalk) -> DivergenceReport {
        let complete = walk.complete();
        let (verdict, suspect) = match (&walk.first_divergence, complete) {
            (_, false) => (INCOMPLETE.to_string(), None),
            (None, true) => (PASS.to_string(), None),
            (Some(first), true) => {
                let label = self.table.label_for(&first.checkpoint).to_string();
                if first.is_missing_instrumentation() {
                    (MISSING_INSTRUMENTATION.to_string(), Some(label))
                } else {
                    (label, None)
                }
            }
        };
        tracing::debug!(entity = %walk.entity, verdict = %verdict, "entity classified");

        DivergenceReport {
            entity: walk.entity,
            complete,
            missing_phases: walk.missing_phases,
            first_divergence: walk.first_divergence,
            verdict,
            suspect,
            rows: walk.rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{UNKNOWN, builtin_table};
    use bisect_log::CheckpointEvent;
    use bisect_plan::{PhasePlan, PipelineSchema, PredicateSpec};
    use bisect_replay::{Correlator, PipelineWalker};

    fn run(events: Vec<CheckpointEvent>, points: &[&str], table: RootCauseTable) -> DivergenceReport {
        let schema = PipelineSchema::new("t").with_nodes(points, PredicateSpec::Hash);
        let walker = PipelineWalker::new(schema, PhasePlan::default());
        let correlation = Correlator::new().correlate(events);
        let trace = correlation.traces.values().next().unwrap();
        Classifier::new(table).classify(walker.walk(trace))
    }

    fn pair(point: &str, reference: u64, probe: u64) -> Vec<CheckpointEvent> {
        vec![
            CheckpointEvent::new("e", "reference", point).with_hash(reference),
            CheckpointEvent::new("e", "probe", point).with_hash(probe),
        ]
    }

    #[test]
    fn test_pass() {
        let report = run(pair("A", 1, 1), &["A"], RootCauseTable::new());
        assert_eq!(report.verdict, PASS);
        assert!(report.passed());
    }

    #[test]
    fn test_mapped_and_unknown() {
        let table = RootCauseTable::new().with_exact(&["B"], "B_CAUSE");
        let mut events = pair("A", 1, 1);
        events.extend(pair("B", 2, 9));
        events.extend(pair("C", 3, 3));
        let report = run(events, &["A", "B", "C"], table);
        assert_eq!(report.verdict, "B_CAUSE");
        assert!(report.failed());
        assert_eq!(report.rows.len(), 3);

        let report = run(pair("Z", 1, 2), &["Z"], builtin_table("attention-block"));
        assert_eq!(report.verdict, UNKNOWN);
    }

    #[test]
    fn test_incomplete_gets_no_cause() {
        let events = vec![CheckpointEvent::new("e", "reference", "A").with_hash(1)];
        let table = RootCauseTable::new().with_exact(&["A"], "A_CAUSE");
        let report = run(events, &["A"], table);
        assert_eq!(report.verdict, INCOMPLETE);
        assert!(!report.complete);
        assert!(report.suspect.is_none());
        assert!(!report.passed());
        assert!(!report.failed());
    }

    #[test]
    fn test_missing_instrumentation_keeps_suspect() {
        let events = vec![
            CheckpointEvent::new("e", "reference", "A").with_hash(1),
            CheckpointEvent::new("e", "probe", "A").with_hash(1),
            CheckpointEvent::new("e", "probe", "D").with_hash(4),
        ];
        let table = RootCauseTable::new().with_exact(&["D"], "D_CAUSE");
        let report = run(events, &["A", "D"], table);
        assert_eq!(report.verdict, MISSING_INSTRUMENTATION);
        assert_eq!(report.suspect.as_deref(), Some("D_CAUSE"));
    }

    #[test]
    fn test_report_json() {
        let report = run(pair("A", 1, 2), &["A"], RootCauseTable::new());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["verdict"], UNKNOWN);
        assert_eq!(json["first_divergence"]["checkpoint"], "A");
        assert!(json.get("suspect").is_none());
    }
}
