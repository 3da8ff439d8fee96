//! Pipeline schemas: the canonical walk order.
//!
//! A schema is an ordered list of checkpoint nodes, optionally repeated over
//! a layer axis with its own declared order. The walk is layer-major: every
//! node of the first declared layer, then every node of the next.

use crate::predicate::PredicateSpec;
use bisect_core::{CheckpointId, NodeKey};
use serde::{Deserialize, Serialize};

/// One checkpoint in a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    /// Checkpoint identifier
    pub checkpoint: CheckpointId,
    /// Equality predicate
    #[serde(default)]
    pub predicate: PredicateSpec,
    /// Numeric threshold override for this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl SchemaNode {
    /// Create a node with the default predicate
    #[must_use]
    pub fn new(checkpoint: impl Into<CheckpointId>) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            predicate: PredicateSpec::default(),
            threshold: None,
        }
    }

    /// Set the predicate
    #[must_use]
    pub fn with_predicate(mut self, predicate: PredicateSpec) -> Self {
        self.predicate = predicate;
        self
    }

    /// Set the threshold override
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Threshold for this node, falling back to the run default
    #[must_use]
    pub fn threshold_or(&self, default: f64) -> f64 {
        self.threshold.unwrap_or(default)
    }
}

/// Ordered checkpoint schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSchema {
    /// Schema name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Layer axis in walk order; empty means unlayered
    #[serde(default)]
    pub layers: Vec<i64>,
    /// Checkpoint nodes in walk order
    #[serde(default)]
    pub nodes: Vec<SchemaNode>,
    /// Derive the node order from each entity's own reference trace
    #[serde(default)]
    pub discover: bool,
}

impl PipelineSchema {
    /// Create an empty, unlayered schema
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            layers: Vec::new(),
            nodes: Vec::new(),
            discover: false,
        }
    }

    /// Create a schema that discovers its order from the trace
    #[must_use]
    pub fn discovering(name: impl Into<String>) -> Self {
        Self {
            discover: true,
            ..Self::new(name)
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the layer axis
    #[must_use]
    pub fn with_layers(mut self, layers: Vec<i64>) -> Self {
        self.layers = layers;
        self
    }

    /// Append a node
    #[must_use]
    pub fn with_node(mut self, node: SchemaNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Append nodes sharing one predicate
    #[must_use]
    pub fn with_nodes(mut self, checkpoints: &[&str], predicate: PredicateSpec) -> Self {
        for checkpoint in checkpoints {
            self.nodes
                .push(SchemaNode::new(*checkpoint).with_predicate(predicate.clone()));
        }
        self
    }

    /// True if the schema has a layer axis
    #[must_use]
    pub fn is_layered(&self) -> bool {
        !self.layers.is_empty()
    }

    /// Look up a node by checkpoint
    #[must_use]
    pub fn node(&self, checkpoint: &CheckpointId) -> Option<&SchemaNode> {
        self.nodes.iter().find(|n| &n.checkpoint == checkpoint)
    }

    /// Number of (layer, node) positions in the declared walk
    #[must_use]
    pub fn walk_len(&self) -> usize {
        self.nodes.len() * self.layers.len().max(1)
    }

    /// Declared walk order: layer-major, then node order
    pub fn walk(&self) -> impl Iterator<Item = (NodeKey, &SchemaNode)> + '_ {
        let layers: Vec<Option<i64>> = if self.layers.is_empty() {
            vec![None]
        } else {
            self.layers.iter().copied().map(Some).collect()
        };
        layers.into_iter().flat_map(move |layer| {
            self.nodes
                .iter()
                .map(move |node| (NodeKey::new(node.checkpoint.clone(), layer), node))
        })
    }

    /// Position of a checkpoint in node order (ignores layers)
    #[must_use]
    pub fn position(&self, checkpoint: &CheckpointId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.checkpoint == checkpoint)
    }
}
