//! Equality predicates attached to schema nodes.

use serde::{Deserialize, Serialize};

/// Default numeric divergence threshold (strict `>`)
pub const DEFAULT_THRESHOLD: f64 = 1e-6;

/// How reference and probe are compared at one checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PredicateSpec {
    /// Exact hash equality
    Hash,
    /// Mean absolute error over paired samples against a threshold
    Numeric,
    /// Numeric MAE, and additionally exact hash equality when within threshold
    #[default]
    Composite,
    /// Exact equality of a named scalar field
    Categorical {
        /// Scalar field compared
        field: String,
    },
}

impl PredicateSpec {
    /// True if the predicate uses a numeric threshold
    #[must_use]
    pub fn uses_threshold(&self) -> bool {
        matches!(self, Self::Numeric | Self::Composite)
    }

    /// Short name for reports
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Numeric => "numeric",
            Self::Composite => "composite",
            Self::Categorical { .. } => "categorical",
        }
    }
}
