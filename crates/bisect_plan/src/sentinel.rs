//! Named sentinel constants.
//!
//! A sentinel flags a known pathological value in a probe event, such as a
//! collapsed argmax token. Flags are annotations only and never change a
//! comparison outcome.

use bisect_core::ScalarValue;
use bisect_log::CheckpointEvent;
use serde::{Deserialize, Serialize};

/// One sentinel rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentinel {
    /// Flag label reported when the rule fires
    pub label: String,
    /// Scalar field inspected
    pub field: String,
    /// Values that fire the rule
    pub values: Vec<ScalarValue>,
}

impl Sentinel {
    /// Create a sentinel on a single value
    #[must_use]
    pub fn new(label: impl Into<String>, field: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self {
            label: label.into(),
            field: field.into(),
            values: vec![value.into()],
        }
    }

    /// True if the event carries one of the sentinel values
    #[must_use]
    pub fn fires(&self, event: &CheckpointEvent) -> bool {
        event
            .scalar(&self.field)
            .is_some_and(|v| self.values.iter().any(|s| s.same_as(v)))
    }
}

/// Ordered collection of sentinels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SentinelSet(Vec<Sentinel>);

impl SentinelSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sentinel
    #[must_use]
    pub fn with(mut self, sentinel: Sentinel) -> Self {
        self.0.push(sentinel);
        self
    }

    /// Labels of every sentinel firing on the event, in declaration order
    #[must_use]
    pub fn flags_for(&self, event: &CheckpointEvent) -> Vec<String> {
        self.0
            .iter()
            .filter(|s| s.fires(event))
            .map(|s| s.label.clone())
            .collect()
    }

    /// Iterate sentinels
    pub fn iter(&self) -> impl Iterator<Item = &Sentinel> {
        self.0.iter()
    }

    /// True if no sentinels are defined
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append every sentinel of `other`
    pub fn extend(&mut self, other: &SentinelSet) {
        self.0.extend(other.0.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_fires() {
        let set = SentinelSet::new().with(Sentinel::new("collapse", "top1_id", 96965_i64));
        let hit = CheckpointEvent::new("p", "decode0", "logits").with_scalar("top1_id", 96965_i64);
        let miss = CheckpointEvent::new("p", "decode0", "logits").with_scalar("top1_id", 11_i64);
        let absent = CheckpointEvent::new("p", "decode0", "logits");
        assert_eq!(set.flags_for(&hit), vec!["collapse".to_string()]);
        assert!(set.flags_for(&miss).is_empty());
        assert!(set.flags_for(&absent).is_empty());
    }

    #[test]
    fn test_sentinel_numeric_cross_type() {
        let sentinel = Sentinel::new("zero", "top1_val", 0_i64);
        let event = CheckpointEvent::new("p", "x", "logits").with_scalar("top1_val", 0.0);
        assert!(sentinel.fires(&event));
    }

    #[test]
    fn test_sentinel_json() {
        let json = r#"[{"label": "collapse", "field": "top1_id", "values": [96965, 0]}]"#;
        let set: SentinelSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.iter().count(), 1);
        assert_eq!(set.iter().next().unwrap().values.len(), 2);
    }
}
