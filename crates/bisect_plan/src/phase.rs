//! Which phases are compared, and which must be present.

use bisect_core::Phase;
use serde::{Deserialize, Serialize};

/// Reference phase, probe phases and the phases an entity must carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePlan {
    /// Phase treated as ground truth
    pub reference: Phase,
    /// Phases compared against the reference, walked in this order
    pub probes: Vec<Phase>,
    /// Phases an entity must have to be analyzed; defaults to all of the above
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<Phase>>,
}

impl PhasePlan {
    /// Plan comparing a single probe against a reference
    #[must_use]
    pub fn pair(reference: impl Into<Phase>, probe: impl Into<Phase>) -> Self {
        Self {
            reference: reference.into(),
            probes: vec![probe.into()],
            required: None,
        }
    }

    /// Add another probe phase
    #[must_use]
    pub fn with_probe(mut self, probe: impl Into<Phase>) -> Self {
        self.probes.push(probe.into());
        self
    }

    /// Override the required phase set
    #[must_use]
    pub fn with_required(mut self, required: Vec<Phase>) -> Self {
        self.required = Some(required);
        self
    }

    /// Effective required phases
    #[must_use]
    pub fn required_phases(&self) -> Vec<Phase> {
        match &self.required {
            Some(required) => required.clone(),
            None => std::iter::once(self.reference.clone())
                .chain(self.probes.iter().cloned())
                .collect(),
        }
    }

    /// True if the phase takes part in comparison
    #[must_use]
    pub fn involves(&self, phase: &Phase) -> bool {
        &self.reference == phase || self.probes.contains(phase)
    }
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self::pair(Phase::reference(), Phase::probe())
    }
}
