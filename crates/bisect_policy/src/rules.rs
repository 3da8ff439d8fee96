//! Root-cause rule tables.

use crate::matcher::CheckpointPattern;
use bisect_core::CheckpointId;
use serde::{Deserialize, Serialize};

/// Verdict of a complete entity with no divergence
pub const PASS: &str = "PASS";
/// Label of a divergence no rule covers
pub const UNKNOWN: &str = "UNKNOWN";
/// Verdict of an entity missing a required phase
pub const INCOMPLETE: &str = "INCOMPLETE";
/// Verdict of a divergence where one side never recorded the checkpoint
pub const MISSING_INSTRUMENTATION: &str = "missing-instrumentation";

/// One table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCauseRule {
    /// Checkpoint id or kind
    pub pattern: CheckpointPattern,
    /// Cause label
    pub label: String,
    /// Where to look next
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl RootCauseRule {
    /// Create a rule without a hint
    #[must_use]
    pub fn new(pattern: CheckpointPattern, label: impl Into<String>) -> Self {
        Self {
            pattern,
            label: label.into(),
            hint: None,
        }
    }

    /// Attach a hint
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Ordered rule table; the first matching rule wins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootCauseTable {
    rules: Vec<RootCauseRule>,
}

impl RootCauseTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule
    #[must_use]
    pub fn with_rule(mut self, rule: RootCauseRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append rules, one per exact checkpoint id, sharing a label
    #[must_use]
    pub fn with_exact(mut self, checkpoints: &[&str], label: &str) -> Self {
        for checkpoint in checkpoints {
            self.rules.push(RootCauseRule::new(
                CheckpointPattern::Exact((*checkpoint).to_string()),
                label,
            ));
        }
        self
    }

    /// First rule matching the checkpoint
    #[must_use]
    pub fn lookup(&self, checkpoint: &CheckpointId) -> Option<&RootCauseRule> {
        self.rules.iter().find(|r| r.pattern.matches(checkpoint))
    }

    /// Label for a checkpoint, `UNKNOWN` when unmapped
    #[must_use]
    pub fn label_for(&self, checkpoint: &CheckpointId) -> &str {
        self.lookup(checkpoint).map_or(UNKNOWN, |r| r.label.as_str())
    }

    /// Hint of the first rule carrying the label
    #[must_use]
    pub fn hint_for_label(&self, label: &str) -> Option<&str> {
        self.rules
            .iter()
            .filter(|r| r.label == label)
            .find_map(|r| r.hint.as_deref())
    }

    /// Rules in order
    pub fn rules(&self) -> impl Iterator<Item = &RootCauseRule> {
        self.rules.iter()
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the table has no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Attach a hint to every rule with the label
    #[must_use]
    fn hinted(mut self, label: &str, hint: &str) -> Self {
        for rule in self.rules.iter_mut().filter(|r| r.label == label) {
            rule.hint = Some(hint.to_string());
        }
        self
    }
}

/// Built-in table for a profile; unknown profiles get an empty table
#[must_use]
pub fn builtin_table(profile: &str) -> RootCauseTable {
    match profile {
        "attention-block" => attention_block(),
        "stage" => stage(),
        "post-wo" => post_wo(),
        "qkv-route" => qkv_route(),
        _ => RootCauseTable::new(),
    }
}

fn attention_block() -> RootCauseTable {
    RootCauseTable::new()
        .with_exact(&["attn_block_in"], "ROUTING_EMBED_TO_ATTN")
        .with_exact(&["attn_rms_in"], "RMS_INPUT_SELECTION")
        .with_exact(&["attn_norm_out"], "RMS_KERNEL")
        .with_exact(&["q_pre_rope"], "QKV_PROJ_INPUT")
        .with_exact(&["q_post_rope"], "ROPE_APPLY")
        .with_rule(RootCauseRule::new(
            CheckpointPattern::Prefix("k_cache".to_string()),
            "KV_CACHE_COHERENCE",
        ))
        .with_rule(RootCauseRule::new(
            CheckpointPattern::Prefix("v_cache".to_string()),
            "KV_CACHE_COHERENCE",
        ))
        .with_exact(&["attn_out", "wo_out"], "ATTN_CORE")
        .with_exact(&["residual_out"], "RESIDUAL_ADD")
        .hinted(
            "ROUTING_EMBED_TO_ATTN",
            "Investigate the routing between embedding output and attention block input.",
        )
        .hinted(
            "RMS_INPUT_SELECTION",
            "Check RMSNorm input selection logic in the attention block.",
        )
        .hinted(
            "KV_CACHE_COHERENCE",
            "Audit KV-cache page mapping and stride handling.",
        )
        .hinted(
            "RESIDUAL_ADD",
            "Debug residual addition before FFN normalization.",
        )
}

fn stage() -> RootCauseTable {
    RootCauseTable::new()
        .with_exact(&["x_in"], "LAYER_INPUT")
        .with_exact(&["attn_out", "x_after_attn"], "ATTENTION")
        .with_exact(&["mlp_out", "x_after_mlp", "x_out"], "MLP")
        .with_exact(&["final_rms"], "FINAL_NORM")
        .with_exact(&["lm_head_in", "logits"], "LM_HEAD")
        .hinted(
            "LAYER_INPUT",
            "The layer already receives different input; bisect the previous layer.",
        )
        .hinted(
            "ATTENTION",
            "Compare the incremental attention path against the batched one for this layer.",
        )
}

fn post_wo() -> RootCauseTable {
    RootCauseTable::new()
        .with_exact(&["x_in"], "LAYER_INPUT")
        .with_exact(&["attn_out"], "ATTN_CORE")
        .with_exact(&["wo_out"], "WO_PROJECTION")
        .with_exact(&["x_after_attn"], "RESIDUAL_ADD")
        .with_exact(&["ffn_norm"], "FFN_NORM")
        .with_exact(&["mlp_out", "x_after_mlp", "x_out"], "MLP")
        .with_exact(&["final_rms"], "FINAL_NORM")
        .with_exact(&["lm_head_in", "logits", "logits_mean"], "LM_HEAD")
}

fn qkv_route() -> RootCauseTable {
    RootCauseTable::new()
        .with_exact(&["q"], "Q_PROJ_ROUTE")
        .with_exact(&["k"], "K_PROJ_ROUTE")
        .with_exact(&["v"], "V_PROJ_ROUTE")
}
