//! Checkpoint aliases.
//!
//! Instrumentation generations sometimes emit the same checkpoint under two
//! names. Aliases are applied at correlation time so both names address
//! the same schema node.

use bisect_core::CheckpointId;
use bisect_log::CheckpointEvent;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Mapping from alternate checkpoint names to canonical ones
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasMap(IndexMap<CheckpointId, CheckpointId>);

impl AliasMap {
    /// Create an empty alias map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `alias` onto `canonical`
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<CheckpointId>, canonical: impl Into<CheckpointId>) -> Self {
        self.0.insert(alias.into(), canonical.into());
        self
    }

    /// Canonical name for a checkpoint
    #[must_use]
    pub fn resolve<'a>(&'a self, checkpoint: &'a CheckpointId) -> &'a CheckpointId {
        self.0.get(checkpoint).unwrap_or(checkpoint)
    }

    /// Rewrite an event onto its canonical checkpoint
    #[must_use]
    pub fn apply(&self, event: CheckpointEvent) -> CheckpointEvent {
        match self.0.get(&event.checkpoint) {
            Some(canonical) => CheckpointEvent {
                checkpoint: canonical.clone(),
                ..event
            },
            None => event,
        }
    }

    /// Iterate (alias, canonical) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&CheckpointId, &CheckpointId)> {
        self.0.iter()
    }

    /// Aliases whose canonical name is itself an alias
    #[must_use]
    pub fn chains(&self) -> Vec<CheckpointId> {
        self.0
            .iter()
            .filter(|(_, canonical)| self.0.contains_key(*canonical))
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    /// Number of aliases
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no aliases are defined
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add every alias of `other`, overriding on conflict
    pub fn extend(&mut self, other: &AliasMap) {
        for (alias, canonical) in other.iter() {
            self.0.insert(alias.clone(), canonical.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_renames() {
        let aliases = AliasMap::new().with_alias("final_norm", "final_rms");
        let event = CheckpointEvent::new("p", "decode0", "final_norm").with_layer(-1);
        let renamed = aliases.apply(event);
        assert_eq!(renamed.checkpoint.as_str(), "final_rms");
        assert_eq!(renamed.layer, Some(-1));

        let untouched = aliases.apply(CheckpointEvent::new("p", "decode0", "x_in"));
        assert_eq!(untouched.checkpoint.as_str(), "x_in");
    }

    #[test]
    fn test_resolve() {
        let aliases = AliasMap::new().with_alias("a", "b");
        let a = CheckpointId::new("a");
        let c = CheckpointId::new("c");
        assert_eq!(aliases.resolve(&a).as_str(), "b");
        assert_eq!(aliases.resolve(&c).as_str(), "c");
    }

    #[test]
    fn test_chains_detected() {
        let aliases = AliasMap::new().with_alias("a", "b").with_alias("b", "c");
        assert_eq!(aliases.chains(), vec![CheckpointId::new("a")]);
        assert!(AliasMap::new().with_alias("a", "b").chains().is_empty());
    }

    #[test]
    fn test_json_form() {
        let aliases: AliasMap = serde_json::from_str(r#"{"final_norm": "final_rms"}"#).unwrap();
        assert_eq!(aliases.len(), 1);
    }
}
