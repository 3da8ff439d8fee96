//! Identifiers for BISECT entities, phases and checkpoints.
//!
//! All identifiers are opaque strings taken verbatim from the trace. No
//! normalization happens here; aliasing is a schema concern.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string-like value
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get as string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume into the inner string
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Entity key - the unit of comparison (one prompt, one token, one case)
    EntityKey
);

string_id!(
    /// Phase name - `reference` for the bulk pass, probe names for incremental passes
    Phase
);

string_id!(
    /// Checkpoint identifier - a named point in the pipeline
    CheckpointId
);

impl Phase {
    /// Default name of the bulk/batch execution
    pub const REFERENCE: &'static str = "reference";
    /// Default name of the incremental execution under test
    pub const PROBE: &'static str = "probe";

    /// The default reference phase
    #[must_use]
    pub fn reference() -> Self {
        Self::new(Self::REFERENCE)
    }

    /// The default probe phase
    #[must_use]
    pub fn probe() -> Self {
        Self::new(Self::PROBE)
    }
}

/// Address of a schema node inside one phase: checkpoint plus optional layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    /// Checkpoint identifier
    pub checkpoint: CheckpointId,
    /// Layer index, if the checkpoint is repeated per layer
    pub layer: Option<i64>,
}

impl NodeKey {
    /// Create a node key
    #[must_use]
    pub fn new(checkpoint: impl Into<CheckpointId>, layer: Option<i64>) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            layer,
        }
    }

    /// Create an unlayered node key
    #[must_use]
    pub fn unlayered(checkpoint: impl Into<CheckpointId>) -> Self {
        Self::new(checkpoint, None)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.layer {
            Some(layer) => write!(f, "{}@L{}", self.checkpoint, layer),
            None => write!(f, "{}", self.checkpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        let id = CheckpointId::new("attn_out");
        assert_eq!(id.to_string(), "attn_out");
        assert_eq!(id.as_str(), "attn_out");
    }

    #[test]
    fn test_phase_defaults() {
        assert_eq!(Phase::reference().as_str(), "reference");
        assert_eq!(Phase::probe().as_str(), "probe");
    }

    #[test]
    fn test_node_key_display() {
        assert_eq!(NodeKey::new("x_in", Some(0)).to_string(), "x_in@L0");
        assert_eq!(NodeKey::new("logits", Some(-1)).to_string(), "logits@L-1");
        assert_eq!(NodeKey::unlayered("wo_out").to_string(), "wo_out");
    }

    #[test]
    fn test_id_serialization_transparent() {
        let key = EntityKey::new("p0");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"p0\"");
        let back: EntityKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_node_key_ordering() {
        let a = NodeKey::new("a", Some(0));
        let b = NodeKey::new("a", Some(1));
        let c = NodeKey::unlayered("a");
        assert!(c < a);
        assert!(a < b);
    }
}
