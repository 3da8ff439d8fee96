//! Sweep mode: grouping sources into variants and picking the best one.

use crate::summary::SourceReport;
use bisect_core::CheckpointId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Sweep configuration errors
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// The family pattern is not a valid regex
    #[error("invalid family pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    /// The family pattern has no `variant` group
    #[error("family pattern must define a named group `variant`")]
    MissingVariantGroup,
    /// Unrecognized metric name
    #[error("unknown sweep metric {0:?} (expected fail-count, leading-mae or checkpoint-mae:<id>)")]
    UnknownMetric(String),
}

/// Identity of one source inside a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyMatch {
    /// Experiment tag, if the pattern captures one
    pub experiment: Option<String>,
    /// Variant tag
    pub variant: String,
    /// Entity carried by the file name, if the pattern captures one
    pub entity: Option<String>,
}

impl FamilyMatch {
    /// Identity derived from the file stem alone
    #[must_use]
    pub fn from_stem(path: &Path) -> Self {
        let variant = path
            .file_stem()
            .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());
        Self {
            experiment: None,
            variant,
            entity: None,
        }
    }
}

/// File name pattern with named groups `experiment`, `variant` and `entity`
#[derive(Debug, Clone)]
pub struct FamilyPattern {
    regex: Regex,
}

impl FamilyPattern {
    /// Compile a pattern
    ///
    /// # Errors
    ///
    /// Returns error if the regex is invalid or lacks a `variant` group
    pub fn new(pattern: &str) -> Result<Self, SweepError> {
        let regex = Regex::new(pattern)?;
        if !regex.capture_names().any(|n| n == Some("variant")) {
            return Err(SweepError::MissingVariantGroup);
        }
        Ok(Self { regex })
    }

    /// Match a source path by its file name
    #[must_use]
    pub fn match_path(&self, path: &Path) -> Option<FamilyMatch> {
        let name = path.file_name()?.to_string_lossy();
        let caps = self.regex.captures(&name)?;
        let group = |n: &str| caps.name(n).map(|m| m.as_str().to_string());
        Some(FamilyMatch {
            experiment: group("experiment"),
            variant: group("variant")?,
            entity: group("entity"),
        })
    }
}

/// Metric minimized when picking the best variant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SweepMetric {
    /// Number of failed entities
    #[default]
    FailCount,
    /// Mean MAE at one checkpoint across the variant's entities
    CheckpointMae(CheckpointId),
    /// Mean MAE of each entity's earliest node with a determinable MAE
    LeadingMae,
}

impl SweepMetric {
    /// Metric value over a group of sources; `None` when not determinable
    #[must_use]
    pub fn measure<'a>(&self, sources: impl IntoIterator<Item = &'a SourceReport>) -> Option<f64> {
        let reports = sources.into_iter().flat_map(|s| s.reports.iter());
        match self {
            Self::FailCount => {
                let mut complete = 0_u64;
                let mut failed = 0_u64;
                for report in reports.filter(|r| r.complete) {
                    complete += 1;
                    if report.failed() {
                        failed += 1;
                    }
                }
                (complete > 0).then_some(failed as f64)
            }
            Self::CheckpointMae(checkpoint) => mean(
                reports
                    .flat_map(|r| r.rows.iter())
                    .filter(|row| &row.checkpoint == checkpoint)
                    .filter_map(|row| row.comparison.mae()),
            ),
            Self::LeadingMae => mean(
                reports.filter_map(|r| r.rows.iter().find_map(|row| row.comparison.mae())),
            ),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (total, count) = values.fold((0.0, 0_u64), |(t, c), v| (t + v, c + 1));
    (count > 0).then(|| total / count as f64)
}

impl FromStr for SweepMetric {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fail-count" => Ok(Self::FailCount),
            "leading-mae" => Ok(Self::LeadingMae),
            other => match other.strip_prefix("checkpoint-mae:") {
                Some(id) if !id.is_empty() => Ok(Self::CheckpointMae(CheckpointId::new(id))),
                _ => Err(SweepError::UnknownMetric(other.to_string())),
            },
        }
    }
}

impl TryFrom<String> for SweepMetric {
    type Error = SweepError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SweepMetric> for String {
    fn from(metric: SweepMetric) -> Self {
        metric.to_string()
    }
}

impl fmt::Display for SweepMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailCount => f.write_str("fail-count"),
            Self::CheckpointMae(id) => write!(f, "checkpoint-mae:{}", id),
            Self::LeadingMae => f.write_str("leading-mae"),
        }
    }
}

/// Winning variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Experiment tag
    pub experiment: Option<String>,
    /// Variant tag
    pub variant: String,
    /// Metric used
    pub metric: SweepMetric,
    /// Metric value
    pub value: f64,
    /// Sources grouped under this variant
    pub sources: Vec<String>,
}

/// Index of the smallest determinable value; ties go to the earliest
#[must_use]
pub fn argmin(values: impl IntoIterator<Item = Option<f64>>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, value) in values.into_iter().enumerate() {
        let Some(value) = value.filter(|v| !v.is_nan()) else {
            continue;
        };
        if best.is_none_or(|(_, b)| value < b) {
            best = Some((i, value));
        }
    }
    best.map(|(i, _)| i)
}

/// Group sources by `(experiment, variant)` in input order and return the
/// group minimizing the metric.
///
/// Sources without a variant tag, and sources that were missing or
/// unreadable, take no part.
#[must_use]
pub fn select_best(sources: &[SourceReport], metric: &SweepMetric) -> Option<Candidate> {
    let mut groups: Vec<((Option<String>, String), Vec<&SourceReport>)> = Vec::new();
    for source in sources {
        let Some(variant) = source.variant.as_ref().filter(|_| source.usable()) else {
            continue;
        };
        let key = (source.experiment.clone(), variant.clone());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(source),
            None => groups.push((key, vec![source])),
        }
    }

    let values: Vec<Option<f64>> = groups
        .iter()
        .map(|(_, members)| metric.measure(members.iter().copied()))
        .collect();
    let index = argmin(values.iter().copied())?;
    let ((experiment, variant), members) = groups.swap_remove(index);
    let value = values[index]?;
    tracing::debug!(
        variant = %variant,
        metric = %metric,
        value,
        groups = values.len(),
        "best sweep variant selected"
    );
    Some(Candidate {
        experiment,
        variant,
        metric: metric.clone(),
        value,
        sources: members.iter().map(|s| s.source.clone()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::tests::reports;

    fn source(name: &str, variant: &str, entities: &[(&str, Vec<(&str, u64, Option<u64>)>)]) -> SourceReport {
        SourceReport {
            variant: Some(variant.to_string()),
            reports: reports(entities),
            ..SourceReport::new(name)
        }
    }

    #[test]
    fn test_family_pattern() {
        let pattern =
            FamilyPattern::new(r"^b3_31_(?P<variant>E[^_]*)_attn_l0_pipe(?:_(?P<experiment>.+))?\.jsonl$")
                .unwrap();
        let m = pattern
            .match_path(Path::new("/runs/b3_31_E2_attn_l0_pipe_p0.jsonl"))
            .unwrap();
        assert_eq!(m.variant, "E2");
        assert_eq!(m.experiment.as_deref(), Some("p0"));
        assert!(m.entity.is_none());
        assert!(pattern.match_path(Path::new("other.jsonl")).is_none());
    }

    #[test]
    fn test_family_pattern_requires_variant() {
        assert!(matches!(
            FamilyPattern::new(r"^(?P<experiment>.+)$"),
            Err(SweepError::MissingVariantGroup)
        ));
        assert!(matches!(
            FamilyPattern::new(r"(?P<variant>"),
            Err(SweepError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_from_stem() {
        let m = FamilyMatch::from_stem(Path::new("dir/run_fast.jsonl"));
        assert_eq!(m.variant, "run_fast");
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("fail-count".parse::<SweepMetric>().unwrap(), SweepMetric::FailCount);
        assert_eq!(
            "checkpoint-mae:q".parse::<SweepMetric>().unwrap(),
            SweepMetric::CheckpointMae(CheckpointId::new("q"))
        );
        assert!("checkpoint-mae:".parse::<SweepMetric>().is_err());
        assert!("fastest".parse::<SweepMetric>().is_err());
        assert_eq!(SweepMetric::LeadingMae.to_string(), "leading-mae");
    }

    #[test]
    fn test_select_best_by_fail_count() {
        let sources = vec![
            source("a.jsonl", "E1", &[("p", vec![("A", 1, Some(2))])]),
            source("b.jsonl", "E2", &[("p", vec![("A", 1, Some(1))])]),
            source("c.jsonl", "E3", &[("p", vec![("A", 1, Some(1))])]),
        ];
        let best = select_best(&sources, &SweepMetric::FailCount).unwrap();
        assert_eq!(best.variant, "E2");
        assert_eq!(best.value, 0.0);
        assert_eq!(best.sources, vec!["b.jsonl".to_string()]);
    }

    #[test]
    fn test_select_best_groups_variants() {
        let sources = vec![
            source("a1.jsonl", "E1", &[("p", vec![("A", 1, Some(1))])]),
            source("a2.jsonl", "E1", &[("q", vec![("A", 1, Some(5))])]),
            source("b1.jsonl", "E2", &[("p", vec![("A", 1, Some(1))])]),
        ];
        let best = select_best(&sources, &SweepMetric::FailCount).unwrap();
        assert_eq!(best.variant, "E2");

        let none = select_best(&[SourceReport::new("x")], &SweepMetric::FailCount);
        assert!(none.is_none());
    }

    #[test]
    fn test_unusable_sources_are_not_candidates() {
        let unreadable = SourceReport {
            variant: Some("E0".to_string()),
            ..SourceReport::unreadable("e0.jsonl", "Is a directory")
        };
        let missing = SourceReport {
            variant: Some("E1".to_string()),
            ..SourceReport::missing("e1.jsonl")
        };
        let failing = source("e2.jsonl", "E2", &[("p", vec![("A", 1, Some(2))])]);
        let best = select_best(&[unreadable, missing, failing], &SweepMetric::FailCount).unwrap();
        assert_eq!(best.variant, "E2");
        assert_eq!(best.value, 1.0);
    }

    #[test]
    fn test_mae_metric_without_samples_is_not_candidate() {
        let sources = vec![source("a.jsonl", "E1", &[("p", vec![("A", 1, Some(1))])])];
        assert!(select_best(&sources, &SweepMetric::LeadingMae).is_none());
    }

    proptest::proptest! {
        #[test]
        fn prop_argmin_is_first_minimum(values in proptest::collection::vec(proptest::option::of(0u8..20), 0..20)) {
            let floats: Vec<Option<f64>> = values.iter().map(|v| v.map(f64::from)).collect();
            let expected = values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|v| (v, i)))
                .min()
                .map(|(_, i)| i);
            proptest::prop_assert_eq!(argmin(floats), expected);
        }
    }
}
