//! Predicate evaluation for one checkpoint.
//!
//! Numeric comparison pairs elements up to the shorter sample. Empty or
//! absent samples never produce a divergence: the result is undetermined.

use bisect_core::ScalarValue;
use bisect_log::CheckpointEvent;
use bisect_plan::PredicateSpec;
use serde::{Deserialize, Serialize};

/// Outcome at one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Reference and probe agree
    Match,
    /// Reference and probe disagree
    Diverged,
    /// Not enough data to decide
    Undetermined,
    /// Only the probe recorded this node
    MissingReference,
    /// Only the reference recorded this node
    MissingProbe,
}

impl Outcome {
    /// True if this node settles a verdict
    #[must_use]
    pub fn is_divergence(&self) -> bool {
        matches!(
            self,
            Self::Diverged | Self::MissingReference | Self::MissingProbe
        )
    }

    /// True if one side is absent
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingReference | Self::MissingProbe)
    }

    /// Short label for tables
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Diverged => "no-match",
            Self::Undetermined => "undetermined",
            Self::MissingReference => "missing-reference",
            Self::MissingProbe => "missing-probe",
        }
    }
}

/// Elementwise difference over paired samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleDiff {
    /// Mean absolute difference
    pub mae: f64,
    /// Maximum absolute difference
    pub max_abs: f64,
    /// Elements compared
    pub paired: usize,
}

/// Absolute difference with a fixed rule for non-finite values: equal
/// non-finite values differ by 0, one non-finite side differs by infinity
fn abs_diff(a: f64, b: f64) -> f64 {
    if a.is_finite() && b.is_finite() {
        return (a - b).abs();
    }
    let same = (a.is_nan() && b.is_nan()) || (a.is_infinite() && a == b);
    if same { 0.0 } else { f64::INFINITY }
}

/// Compare the first `min(len)` elements of both samples.
///
/// Returns `None` when nothing can be paired.
#[must_use]
pub fn sample_diff(reference: &[f64], probe: &[f64]) -> Option<SampleDiff> {
    let paired = reference.len().min(probe.len());
    if paired == 0 {
        return None;
    }
    let (total, max_abs) = reference
        .iter()
        .zip(probe)
        .map(|(a, b)| abs_diff(*a, *b))
        .fold((0.0_f64, 0.0_f64), |(total, max), d| (total + d, max.max(d)));
    Some(SampleDiff {
        mae: total / paired as f64,
        max_abs,
        paired,
    })
}

/// Evaluation result at one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Outcome
    pub outcome: Outcome,
    /// Numeric difference, when samples were paired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<SampleDiff>,
    /// Hash equality, when both hashes were present and consulted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_equal: Option<bool>,
    /// Reference value of a categorical field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_value: Option<ScalarValue>,
    /// Probe value of a categorical field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_value: Option<ScalarValue>,
}

impl Comparison {
    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            diff: None,
            hash_equal: None,
            reference_value: None,
            probe_value: None,
        }
    }

    /// Comparison for a node recorded on one side only
    #[must_use]
    pub fn missing(reference_present: bool) -> Self {
        Self::new(if reference_present {
            Outcome::MissingProbe
        } else {
            Outcome::MissingReference
        })
    }

    /// Mean absolute error, if computed
    #[must_use]
    pub fn mae(&self) -> Option<f64> {
        self.diff.map(|d| d.mae)
    }
}

/// Evaluate a predicate on a reference/probe pair
#[must_use]
pub fn evaluate(
    predicate: &PredicateSpec,
    threshold: f64,
    reference: &CheckpointEvent,
    probe: &CheckpointEvent,
) -> Comparison {
    let hash_equal = match (reference.hash, probe.hash) {
        (Some(a), Some(b)) => Some(a == b),
        _ => None,
    };

    match predicate {
        PredicateSpec::Hash => match hash_equal {
            Some(equal) => Comparison {
                hash_equal,
                ..Comparison::new(if equal { Outcome::Match } else { Outcome::Diverged })
            },
            None => Comparison::new(Outcome::Undetermined),
        },
        PredicateSpec::Numeric => {
            match sample_diff(reference.sample_slice(), probe.sample_slice()) {
                Some(diff) => Comparison {
                    diff: Some(diff),
                    ..Comparison::new(if diff.mae > threshold {
                        Outcome::Diverged
                    } else {
                        Outcome::Match
                    })
                },
                None => Comparison::new(Outcome::Undetermined),
            }
        }
        PredicateSpec::Composite => {
            let diff = sample_diff(reference.sample_slice(), probe.sample_slice());
            let outcome = match (diff, hash_equal) {
                (Some(d), _) if d.mae > threshold => Outcome::Diverged,
                (_, Some(false)) => Outcome::Diverged,
                (Some(_), _) | (None, Some(true)) => Outcome::Match,
                (None, None) => Outcome::Undetermined,
            };
            Comparison {
                diff,
                hash_equal,
                ..Comparison::new(outcome)
            }
        }
        PredicateSpec::Categorical { field } => {
            let reference_value = reference.scalar(field).cloned();
            let probe_value = probe.scalar(field).cloned();
            let outcome = match (&reference_value, &probe_value) {
                (Some(a), Some(b)) if a.same_as(b) => Outcome::Match,
                (Some(_), Some(_)) => Outcome::Diverged,
                _ => Outcome::Undetermined,
            };
            Comparison {
                reference_value,
                probe_value,
                ..Comparison::new(outcome)
            }
        }
    }
}
