//! Built-in analysis profiles.
//!
//! Each profile bundles the schema, phase plan, field mapping, aliases and
//! sentinels for one family of checkpoint traces. Root-cause tables live
//! with the classifier and are looked up by the same profile name.

use crate::alias::AliasMap;
use crate::phase::PhasePlan;
use crate::predicate::PredicateSpec;
use crate::schema::{PipelineSchema, SchemaNode};
use crate::sentinel::{Sentinel, SentinelSet};
use bisect_log::FieldMap;
use serde::{Deserialize, Serialize};

/// Token id produced by the known collapsed-argmax failure mode
pub const COLLAPSE_TOKEN_ID: i64 = 96965;

/// Everything a profile decides before any trace is read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Walk order and predicates
    pub schema: PipelineSchema,
    /// Reference and probe phases
    pub phases: PhasePlan,
    /// Trace key mapping
    pub fields: FieldMap,
    /// Checkpoint aliases applied before correlation
    pub aliases: AliasMap,
    /// Sentinel flags
    pub sentinels: SentinelSet,
    /// Default numeric threshold for nodes without their own
    pub default_threshold: Option<f64>,
    /// Sweep family file name pattern
    pub family: Option<String>,
    /// Sweep metric name
    pub best_by: Option<String>,
}

impl Preset {
    fn new(schema: PipelineSchema) -> Self {
        Self {
            schema,
            phases: PhasePlan::default(),
            fields: FieldMap::default(),
            aliases: AliasMap::new(),
            sentinels: SentinelSet::new(),
            default_threshold: None,
            family: None,
            best_by: None,
        }
    }

    fn prefill_decode(mut self) -> Self {
        self.phases = PhasePlan::pair("prefill_last", "decode0");
        self
    }
}

const PRESET_NAMES: [&str; 5] = ["stage", "attention-block", "post-wo", "qkv-route", "generic"];

/// Names of every built-in profile
#[must_use]
pub fn preset_names() -> &'static [&'static str] {
    &PRESET_NAMES
}

/// Look up a built-in profile by name
#[must_use]
pub fn preset(name: &str) -> Option<Preset> {
    match name {
        "stage" => Some(stage()),
        "attention-block" => Some(attention_block()),
        "post-wo" => Some(post_wo()),
        "qkv-route" => Some(qkv_route()),
        "generic" => Some(generic()),
        _ => None,
    }
}

/// Per-layer decoder stages plus the final norm, LM head and logits
fn stage() -> Preset {
    let schema = PipelineSchema::new("stage")
        .with_description("Decoder stage trace, layer-major, prefill vs first decode step")
        .with_layers(vec![0, 1, 2, 15, 31, 32, -1])
        .with_nodes(
            &[
                "x_in",
                "attn_out",
                "x_after_attn",
                "mlp_out",
                "x_out",
                "x_after_mlp",
                "final_rms",
                "lm_head_in",
            ],
            PredicateSpec::Composite,
        )
        .with_node(SchemaNode::new("logits").with_predicate(PredicateSpec::Categorical {
            field: "top1_id".to_string(),
        }));

    let mut preset = Preset::new(schema).prefill_decode();
    preset.fields.fallback_entity = Some("unknown".to_string());
    preset.aliases = AliasMap::new().with_alias("final_norm", "final_rms");
    preset.sentinels =
        SentinelSet::new().with(Sentinel::new("collapse", "top1_id", COLLAPSE_TOKEN_ID));
    preset.default_threshold = Some(0.0);
    preset
}

/// Attention block internals keyed by token id, compared by hash
fn attention_block() -> Preset {
    let schema = PipelineSchema::new("attention-block")
        .with_description("Layer-0 attention block trace points, hash equality per token")
        .with_nodes(
            &[
                "embedding_out",
                "attn_block_in",
                "attn_rms_in",
                "attn_norm_out",
                "q_pre_rope",
                "q_post_rope",
                "k_cache_fp_pos0",
                "k_cache_fp_mid",
                "k_cache_fp_last",
                "v_cache_fp_pos0",
                "v_cache_fp_mid",
                "v_cache_fp_last",
                "attn_out",
                "wo_out",
                "residual_out",
            ],
            PredicateSpec::Hash,
        );

    let mut preset = Preset::new(schema).prefill_decode();
    preset.fields.entity = vec!["token_id".to_string()];
    preset.fields.checkpoint = vec!["point".to_string(), "checkpoint".to_string()];
    preset
}

/// Post output-projection stages, sampled, one prompt per file, followed by
/// the logits record's top-1 id and mean
fn post_wo() -> Preset {
    let schema = PipelineSchema::new("post-wo")
        .with_description("Stages after the attention output projection, MAE over samples, then logits")
        .with_nodes(
            &[
                "x_in",
                "attn_out",
                "wo_out",
                "x_after_attn",
                "ffn_norm",
                "mlp_out",
                "x_after_mlp",
                "x_out",
                "final_rms",
                "lm_head_in",
            ],
            PredicateSpec::Numeric,
        )
        .with_node(SchemaNode::new("logits").with_predicate(PredicateSpec::Categorical {
            field: "top1_id".to_string(),
        }))
        .with_node(SchemaNode::new("logits_mean").with_predicate(PredicateSpec::Numeric));

    let mut preset = Preset::new(schema).prefill_decode();
    preset.fields.event_filter = vec!["post_wo_trace".to_string(), "post_wo_logits".to_string()];
    preset.fields.event_checkpoint = true;
    preset.fields.split = vec!["logits_mean".to_string()];
    preset.aliases = AliasMap::new().with_alias("post_wo_logits", "logits");
    preset.sentinels =
        SentinelSet::new().with(Sentinel::new("collapse", "top1_id", COLLAPSE_TOKEN_ID));
    preset.default_threshold = Some(1e-6);
    preset.family = Some(r"^b3_41_post_wo_(?P<entity>.+)_(?P<variant>E\d+)\.jsonl$".to_string());
    preset
}

/// Layer-0 Q/K/V projections across routing variants
fn qkv_route() -> Preset {
    let schema = PipelineSchema::new("qkv-route")
        .with_description("Layer-0 Q, K and V projection outputs across routing variants")
        .with_nodes(&["q", "k", "v"], PredicateSpec::Numeric);

    let mut preset = Preset::new(schema).prefill_decode();
    preset.fields.event_filter = vec!["attn_l0_pipe".to_string()];
    preset.fields.split = vec!["q".to_string(), "k".to_string(), "v".to_string()];
    preset.fields.fallback_entity = Some("unknown".to_string());
    preset.family =
        Some(r"^b3_31_(?P<variant>E[^_]*)_attn_l0_pipe(?:_(?P<experiment>.+))?\.jsonl$".to_string());
    preset.best_by = Some("checkpoint-mae:q".to_string());
    preset
}

/// No fixed order: walk each entity's reference trace as recorded
fn generic() -> Preset {
    Preset::new(
        PipelineSchema::discovering("generic")
            .with_description("Checkpoint order discovered from the reference trace"),
    )
}
