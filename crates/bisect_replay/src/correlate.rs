//! Correlation: group events by entity into per-entity traces.

use crate::trace::EntityTrace;
use bisect_core::EntityKey;
use bisect_log::CheckpointEvent;
use bisect_plan::AliasMap;
use indexmap::IndexMap;

/// Result of correlating one event stream
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    /// Traces by entity, in first-seen order
    pub traces: IndexMap<EntityKey, EntityTrace>,
    /// Events consumed
    pub events: u64,
    /// Events that replaced an earlier event with the same key
    pub overwritten: u64,
}

impl Correlation {
    /// Number of entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// True if no entity was seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Trace for one entity
    #[must_use]
    pub fn get(&self, entity: &EntityKey) -> Option<&EntityTrace> {
        self.traces.get(entity)
    }
}

/// Folds an event stream into entity traces
#[derive(Debug, Clone, Default)]
pub struct Correlator {
    aliases: AliasMap,
}

impl Correlator {
    /// Create a correlator with no aliases
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rename aliased checkpoints onto their canonical names before folding
    #[must_use]
    pub fn with_aliases(mut self, aliases: AliasMap) -> Self {
        self.aliases = aliases;
        self
    }

    /// Consume the events and build per-entity traces
    pub fn correlate<I>(&self, events: I) -> Correlation
    where
        I: IntoIterator<Item = CheckpointEvent>,
    {
        let mut result = Correlation::default();
        for event in events {
            let event = self.aliases.apply(event);
            result.events += 1;
            let trace = result
                .traces
                .entry(event.entity.clone())
                .or_insert_with(|| EntityTrace::new(event.entity.clone()));
            if trace.insert(event).is_some() {
                result.overwritten += 1;
            }
        }
        tracing::debug!(
            entities = result.traces.len(),
            events = result.events,
            overwritten = result.overwritten,
            "events correlated"
        );
        result
    }
}
