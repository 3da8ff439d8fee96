//! Analysis configuration.
//!
//! Resolution order, lowest to highest: built-in defaults, the selected
//! profile, the JSON config file, command-line flags.

use bisect_log::FieldMap;
use bisect_plan::{
    AliasMap, DEFAULT_THRESHOLD, PhasePlan, PipelineSchema, Preset, SchemaError, SentinelSet,
    preset, preset_names, validate_plan,
};
use bisect_policy::{RootCauseTable, builtin_table};
use bisect_report::{FamilyPattern, SweepError, SweepMetric};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config {path}: {error}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying error
        error: std::io::Error,
    },
    /// Config file is not a valid configuration
    #[error("invalid config {path}: {error}")]
    Parse {
        /// Config path
        path: PathBuf,
        /// Underlying error
        error: serde_json::Error,
    },
    /// Unknown profile name
    #[error("unknown schema {0:?} (available: {names})", names = preset_names().join(", "))]
    UnknownProfile(String),
    /// The resolved plan is inconsistent
    #[error("invalid analysis plan:\n  {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n  "))]
    InvalidPlan(Vec<SchemaError>),
    /// Bad sweep settings
    #[error(transparent)]
    Sweep(#[from] SweepError),
    /// Threshold negative or not a number
    #[error("invalid threshold {0}")]
    InvalidThreshold(f64),
}

/// JSON configuration file; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Base profile name
    pub profile: Option<String>,
    /// Replacement schema
    pub schema: Option<PipelineSchema>,
    /// Default numeric threshold
    pub threshold: Option<f64>,
    /// Replacement phase plan
    pub phases: Option<PhasePlan>,
    /// Replacement field mapping
    pub fields: Option<FieldMap>,
    /// Additional aliases
    pub aliases: Option<AliasMap>,
    /// Additional sentinels
    pub sentinels: Option<SentinelSet>,
    /// Replacement root-cause table
    pub root_causes: Option<RootCauseTable>,
    /// Sweep family pattern
    pub family: Option<String>,
    /// Sweep metric
    pub best_by: Option<String>,
}

impl AnalysisConfig {
    /// Load a config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        serde_json::from_str(&text).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }
}

/// Command-line overrides
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Profile name
    pub schema: Option<String>,
    /// Default threshold
    pub threshold: Option<f64>,
    /// Reference phase
    pub reference: Option<String>,
    /// Probe phases, replacing the configured ones
    pub probes: Vec<String>,
    /// Sweep family pattern
    pub family: Option<String>,
    /// Sweep metric
    pub best_by: Option<String>,
    /// Entity for records that carry none
    pub default_entity: Option<String>,
}

/// Fully resolved analysis settings
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Profile the settings started from
    pub profile: String,
    /// Schema, phases, fields, aliases and sentinels
    pub preset: Preset,
    /// Root-cause table
    pub table: RootCauseTable,
    /// Default numeric threshold
    pub threshold: f64,
    /// Sweep family pattern
    pub family: Option<FamilyPattern>,
    /// Sweep metric, if one was requested
    pub metric: Option<SweepMetric>,
}

/// Resolve the final settings
///
/// # Errors
///
/// Returns error if a profile is unknown, a pattern or metric is invalid,
/// or the resulting plan fails validation
pub fn resolve(config: AnalysisConfig, overrides: Overrides) -> Result<Resolved, ConfigError> {
    let profile = overrides
        .schema
        .or(config.profile)
        .unwrap_or_else(|| "generic".to_string());
    let mut preset = preset(&profile).ok_or_else(|| ConfigError::UnknownProfile(profile.clone()))?;
    let mut table = builtin_table(&profile);

    if let Some(schema) = config.schema {
        preset.schema = schema;
    }
    if let Some(phases) = config.phases {
        preset.phases = phases;
    }
    if let Some(fields) = config.fields {
        preset.fields = fields;
    }
    if let Some(aliases) = &config.aliases {
        preset.aliases.extend(aliases);
    }
    if let Some(sentinels) = &config.sentinels {
        preset.sentinels.extend(sentinels);
    }
    if let Some(root_causes) = config.root_causes {
        table = root_causes;
    }

    if let Some(reference) = overrides.reference {
        preset.phases.reference = reference.into();
    }
    if !overrides.probes.is_empty() {
        preset.phases.probes = overrides.probes.into_iter().map(Into::into).collect();
        preset.phases.required = None;
    }
    if let Some(entity) = overrides.default_entity {
        preset.fields.fallback_entity = Some(entity);
    }

    let threshold = overrides
        .threshold
        .or(config.threshold)
        .or(preset.default_threshold)
        .unwrap_or(DEFAULT_THRESHOLD);
    if threshold.is_nan() || threshold < 0.0 {
        return Err(ConfigError::InvalidThreshold(threshold));
    }

    validate_plan(&preset.schema, &preset.phases, &preset.aliases)
        .map_err(ConfigError::InvalidPlan)?;

    let family = overrides
        .family
        .or(config.family)
        .or_else(|| preset.family.clone())
        .map(|p| FamilyPattern::new(&p))
        .transpose()?;
    let metric = overrides
        .best_by
        .or(config.best_by)
        .or_else(|| preset.best_by.clone())
        .map(|m| m.parse::<SweepMetric>())
        .transpose()?;

    tracing::debug!(
        profile = %profile,
        schema = %preset.schema.name,
        threshold,
        probes = preset.phases.probes.len(),
        "analysis plan resolved"
    );

    Ok(Resolved {
        profile,
        preset,
        table,
        threshold,
        family,
        metric,
    })
}
