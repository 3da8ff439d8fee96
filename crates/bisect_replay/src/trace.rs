//! Per-entity trace.
//!
//! Events are keyed by `(phase, checkpoint, layer)`. A later event for the
//! same key replaces the earlier one; nothing is averaged or merged. The
//! key keeps its first-seen position so iteration order is stable.

use bisect_core::{CheckpointId, EntityKey, NodeKey, Phase};
use bisect_log::CheckpointEvent;
use indexmap::{IndexMap, IndexSet};

/// All checkpoint events of one entity, last write wins
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTrace {
    entity: EntityKey,
    events: IndexMap<(Phase, NodeKey), CheckpointEvent>,
    /// Latest layer written per (phase, checkpoint)
    latest: IndexMap<(Phase, CheckpointId), NodeKey>,
    phases: IndexSet<Phase>,
}

impl EntityTrace {
    /// Create an empty trace
    #[must_use]
    pub fn new(entity: EntityKey) -> Self {
        Self {
            entity,
            events: IndexMap::new(),
            latest: IndexMap::new(),
            phases: IndexSet::new(),
        }
    }

    /// Entity identity
    #[must_use]
    pub fn entity(&self) -> &EntityKey {
        &self.entity
    }

    /// Record an event, returning the one it replaced
    pub fn insert(&mut self, event: CheckpointEvent) -> Option<CheckpointEvent> {
        let key = event.node_key();
        self.phases.insert(event.phase.clone());
        self.latest.insert(
            (event.phase.clone(), event.checkpoint.clone()),
            key.clone(),
        );
        self.events.insert((event.phase.clone(), key), event)
    }

    /// Exact lookup by phase and node
    #[must_use]
    pub fn get(&self, phase: &Phase, key: &NodeKey) -> Option<&CheckpointEvent> {
        self.events.get(&(phase.clone(), key.clone()))
    }

    /// Lookup by checkpoint alone, resolving to the most recently written layer
    #[must_use]
    pub fn latest(&self, phase: &Phase, checkpoint: &CheckpointId) -> Option<&CheckpointEvent> {
        self.latest
            .get(&(phase.clone(), checkpoint.clone()))
            .and_then(|key| self.get(phase, key))
    }

    /// Node both phases are compared at.
    ///
    /// A layered key is used as is. An unlayered key resolves to the
    /// unlayered event if one exists, else to the latest layer written by
    /// `primary`, else to the latest layer written by `secondary`. Both
    /// sides are then read at that one key so layers never cross.
    #[must_use]
    pub fn resolve(&self, primary: &Phase, secondary: &Phase, key: &NodeKey) -> NodeKey {
        if key.layer.is_some() {
            return key.clone();
        }
        [primary, secondary]
            .into_iter()
            .find_map(|phase| {
                if self.get(phase, key).is_some() {
                    Some(key.clone())
                } else {
                    self.latest(phase, &key.checkpoint).map(CheckpointEvent::node_key)
                }
            })
            .unwrap_or_else(|| key.clone())
    }

    /// True if at least one event of the phase was seen
    #[must_use]
    pub fn has_phase(&self, phase: &Phase) -> bool {
        self.phases.contains(phase)
    }

    /// Phases seen, in first-seen order
    pub fn phases(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter()
    }

    /// Required phases this entity lacks
    #[must_use]
    pub fn missing_phases(&self, required: &[Phase]) -> Vec<Phase> {
        required
            .iter()
            .filter(|p| !self.has_phase(p))
            .cloned()
            .collect()
    }

    /// Node keys recorded for a phase, in first-seen order
    pub fn keys_in<'a>(&'a self, phase: &'a Phase) -> impl Iterator<Item = &'a NodeKey> + 'a {
        self.events
            .keys()
            .filter(move |(p, _)| p == phase)
            .map(|(_, key)| key)
    }

    /// Number of distinct (phase, node) keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if no events were recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
