//! Plan validation.
//!
//! A plan is rejected up front rather than producing a confusing walk:
//! every problem found is reported, not just the first.

use crate::alias::AliasMap;
use crate::phase::PhasePlan;
use crate::predicate::PredicateSpec;
use crate::schema::PipelineSchema;
use bisect_core::CheckpointId;
use indexmap::IndexSet;

/// Schema validation error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// Fixed-order schema with no nodes
    #[error("schema {0} has no nodes")]
    Empty(String),
    /// Checkpoint listed twice
    #[error("duplicate checkpoint {0}")]
    DuplicateNode(CheckpointId),
    /// Layer listed twice
    #[error("duplicate layer {0}")]
    DuplicateLayer(i64),
    /// Threshold negative or not a number
    #[error("invalid threshold {threshold} on {checkpoint}")]
    InvalidThreshold {
        /// Node carrying the threshold
        checkpoint: CheckpointId,
        /// Offending value
        threshold: f64,
    },
    /// Threshold on a predicate that never uses one
    #[error("threshold on {0} is ignored by its {1} predicate")]
    UnusedThreshold(CheckpointId, &'static str),
    /// Categorical predicate naming no field
    #[error("categorical predicate on {0} names no field")]
    EmptyField(CheckpointId),
    /// Alias pointing at another alias
    #[error("alias {0} resolves to another alias")]
    AliasChain(CheckpointId),
    /// Alias shadowing a schema node
    #[error("alias {0} shadows a schema checkpoint")]
    AliasShadowsNode(CheckpointId),
    /// No probe phase
    #[error("phase plan has no probe phase")]
    NoProbe,
    /// A probe equal to the reference
    #[error("probe phase {0} is also the reference phase")]
    ProbeIsReference(String),
    /// A probe listed twice
    #[error("duplicate probe phase {0}")]
    DuplicateProbe(String),
}

/// Validate a schema together with its phase plan and aliases
///
/// # Errors
///
/// Returns every problem found
pub fn validate_plan(
    schema: &PipelineSchema,
    phases: &PhasePlan,
    aliases: &AliasMap,
) -> Result<(), Vec<SchemaError>> {
    let mut errors = Vec::new();

    if schema.nodes.is_empty() && !schema.discover {
        errors.push(SchemaError::Empty(schema.name.clone()));
    }

    let mut seen = IndexSet::new();
    for node in &schema.nodes {
        if !seen.insert(&node.checkpoint) {
            errors.push(SchemaError::DuplicateNode(node.checkpoint.clone()));
        }
        if let Some(threshold) = node.threshold {
            if threshold.is_nan() || threshold < 0.0 {
                errors.push(SchemaError::InvalidThreshold {
                    checkpoint: node.checkpoint.clone(),
                    threshold,
                });
            } else if !node.predicate.uses_threshold() {
                errors.push(SchemaError::UnusedThreshold(
                    node.checkpoint.clone(),
                    node.predicate.name(),
                ));
            }
        }
        if let PredicateSpec::Categorical { field } = &node.predicate {
            if field.trim().is_empty() {
                errors.push(SchemaError::EmptyField(node.checkpoint.clone()));
            }
        }
    }

    let mut layers = IndexSet::new();
    for layer in &schema.layers {
        if !layers.insert(*layer) {
            errors.push(SchemaError::DuplicateLayer(*layer));
        }
    }

    for alias in aliases.chains() {
        errors.push(SchemaError::AliasChain(alias));
    }
    for (alias, _) in aliases.iter() {
        if schema.node(alias).is_some() {
            errors.push(SchemaError::AliasShadowsNode(alias.clone()));
        }
    }

    if phases.probes.is_empty() {
        errors.push(SchemaError::NoProbe);
    }
    let mut probes = IndexSet::new();
    for probe in &phases.probes {
        if probe == &phases.reference {
            errors.push(SchemaError::ProbeIsReference(probe.to_string()));
        } else if !probes.insert(probe) {
            errors.push(SchemaError::DuplicateProbe(probe.to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaNode;
    use bisect_core::Phase;

    fn schema() -> PipelineSchema {
        PipelineSchema::new("t").with_nodes(&["a", "b"], PredicateSpec::Numeric)
    }

    #[test]
    fn test_valid_plan() {
        assert!(validate_plan(&schema(), &PhasePlan::default(), &AliasMap::new()).is_ok());
    }

    #[test]
    fn test_empty_schema() {
        let errors =
            validate_plan(&PipelineSchema::new("e"), &PhasePlan::default(), &AliasMap::new())
                .unwrap_err();
        assert_eq!(errors, vec![SchemaError::Empty("e".to_string())]);

        let discovering = PipelineSchema::discovering("g");
        assert!(validate_plan(&discovering, &PhasePlan::default(), &AliasMap::new()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let schema = schema()
            .with_node(SchemaNode::new("a"))
            .with_node(SchemaNode::new("c").with_threshold(-1.0))
            .with_node(SchemaNode::new("d").with_predicate(PredicateSpec::Hash).with_threshold(0.1))
            .with_node(SchemaNode::new("e").with_predicate(PredicateSpec::Categorical {
                field: " ".to_string(),
            }))
            .with_layers(vec![0, 1, 0]);
        let aliases = AliasMap::new().with_alias("x", "y").with_alias("y", "z").with_alias("b", "a");
        let phases = PhasePlan::pair("r", "r");

        let errors = validate_plan(&schema, &phases, &aliases).unwrap_err();
        assert!(errors.contains(&SchemaError::DuplicateNode(CheckpointId::new("a"))));
        assert!(errors.iter().any(|e| matches!(e, SchemaError::InvalidThreshold { .. })));
        assert!(errors.contains(&SchemaError::UnusedThreshold(CheckpointId::new("d"), "hash")));
        assert!(errors.contains(&SchemaError::EmptyField(CheckpointId::new("e"))));
        assert!(errors.contains(&SchemaError::DuplicateLayer(0)));
        assert!(errors.contains(&SchemaError::AliasChain(CheckpointId::new("x"))));
        assert!(errors.contains(&SchemaError::AliasShadowsNode(CheckpointId::new("b"))));
        assert!(errors.contains(&SchemaError::ProbeIsReference("r".to_string())));
    }

    #[test]
    fn test_phase_errors() {
        let phases = PhasePlan {
            reference: Phase::reference(),
            probes: Vec::new(),
            required: None,
        };
        let errors = validate_plan(&schema(), &phases, &AliasMap::new()).unwrap_err();
        assert_eq!(errors, vec![SchemaError::NoProbe]);

        let phases = PhasePlan::pair("r", "p").with_probe("p");
        let errors = validate_plan(&schema(), &phases, &AliasMap::new()).unwrap_err();
        assert_eq!(errors, vec![SchemaError::DuplicateProbe("p".to_string())]);
    }
}
