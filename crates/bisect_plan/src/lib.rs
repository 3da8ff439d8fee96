//! BISECT.TRACE Planner
//!
//! Everything that decides *what* to compare, expressed as data: the
//! canonical checkpoint order, the equality predicate per checkpoint, which
//! phases are compared, checkpoint aliases and named sentinel constants.
//! New checkpoint families are new configuration, not new code.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alias;
pub mod phase;
pub mod predicate;
pub mod presets;
pub mod schema;
pub mod sentinel;
pub mod validate;

pub use alias::AliasMap;
pub use phase::PhasePlan;
pub use predicate::{PredicateSpec, DEFAULT_THRESHOLD};
pub use presets::{Preset, preset, preset_names};
pub use schema::{PipelineSchema, SchemaNode};
pub use sentinel::{Sentinel, SentinelSet};
pub use validate::{SchemaError, validate_plan};
