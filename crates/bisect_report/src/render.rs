//! Report renderers.
//!
//! Column order is fixed per format so output diffs cleanly between runs of
//! the same schema.

use crate::summary::{SourceReport, Summary};
use crate::sweep::Candidate;
use bisect_core::ScalarValue;
use bisect_replay::{CheckpointSummary, WalkRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Tab-separated rows and summary lines
    #[default]
    Tsv,
    /// Markdown report
    Markdown,
    /// JSON document
    Json,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tsv" => Ok(Self::Tsv),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format {:?} (expected tsv, markdown or json)", other)),
        }
    }
}

/// Everything one analysis run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    /// Schema name
    pub schema: String,
    /// When the report was generated
    pub generated_at: DateTime<Utc>,
    /// Per-source reports in input order
    pub sources: Vec<SourceReport>,
    /// Merged summary
    pub summary: Summary,
    /// Best sweep variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best: Option<Candidate>,
    /// Hint for the primary cause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl AnalysisRun {
    /// Build a run from per-source reports, merging their summaries
    #[must_use]
    pub fn new(schema: impl Into<String>, sources: Vec<SourceReport>) -> Self {
        let mut summary = Summary::new();
        for source in &sources {
            summary.merge(&source.summary());
        }
        Self {
            schema: schema.into(),
            generated_at: Utc::now(),
            sources,
            summary,
            best: None,
            hint: None,
        }
    }

    /// Attach the best sweep variant
    #[must_use]
    pub fn with_best(mut self, best: Option<Candidate>) -> Self {
        self.best = best;
        self
    }

    /// Attach the primary cause hint
    #[must_use]
    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }
}

/// Render a run in the given format
///
/// # Errors
///
/// Returns error only if JSON serialization fails
pub fn render(run: &AnalysisRun, format: Format) -> Result<String, serde_json::Error> {
    match format {
        Format::Tsv => Ok(render_tsv(run)),
        Format::Markdown => Ok(render_markdown(run)),
        Format::Json => serde_json::to_string_pretty(run).map(|mut s| {
            s.push('\n');
            s
        }),
    }
}

const ROW_COLUMNS: [&str; 13] = [
    "source",
    "entity",
    "probe",
    "checkpoint",
    "layer",
    "predicate",
    "mae",
    "max_abs",
    "hash_equal",
    "reference",
    "probe_value",
    "result",
    "flags",
];

const VERDICT_COLUMNS: [&str; 6] = [
    "source",
    "entity",
    "complete",
    "verdict",
    "first_divergence",
    "suspect",
];

/// Compact number formatting: plain decimals in a readable range,
/// scientific notation outside it
fn num(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else if !value.is_finite() {
        value.to_string()
    } else if (1e-4..1e6).contains(&value.abs()) {
        let text = format!("{:.6}", value);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        format!("{:.6e}", value)
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn scalar(value: Option<&ScalarValue>) -> String {
    opt(value)
}

/// A TSV cell never contains a raw separator: tab, newline, carriage return
/// and backslash are written as escape sequences
fn field(value: impl ToString) -> String {
    let text = value.to_string();
    if !text.contains(['\t', '\n', '\r', '\\']) {
        return text;
    }
    let mut out = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

fn row_cells(source: &str, entity: &str, row: &WalkRow) -> Vec<String> {
    let diff = row.comparison.diff;
    let cells = vec![
        source.to_string(),
        entity.to_string(),
        row.probe.to_string(),
        row.checkpoint.to_string(),
        opt(row.layer),
        row.predicate.clone(),
        diff.map_or_else(|| "-".to_string(), |d| num(d.mae)),
        diff.map_or_else(|| "-".to_string(), |d| num(d.max_abs)),
        opt(row.comparison.hash_equal),
        scalar(row.comparison.reference_value.as_ref()),
        scalar(row.comparison.probe_value.as_ref()),
        row.outcome().label().to_string(),
        if row.flags.is_empty() {
            "-".to_string()
        } else {
            row.flags.join(",")
        },
    ];
    cells.into_iter().map(field).collect()
}

fn render_tsv(run: &AnalysisRun) -> String {
    let mut out = String::new();
    out.push_str(&ROW_COLUMNS.join("\t"));
    out.push('\n');
    for source in &run.sources {
        for report in &source.reports {
            for row in &report.rows {
                out.push_str(&row_cells(&source.source, report.entity.as_str(), row).join("\t"));
                out.push('\n');
            }
        }
    }

    out.push('\n');
    out.push_str(&VERDICT_COLUMNS.join("\t"));
    out.push('\n');
    for source in &run.sources {
        for report in &source.reports {
            let first = report.first_divergence.as_ref().map(|f| f.node_key());
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\t{}\n",
                field(&source.source),
                field(&report.entity),
                report.complete,
                field(&report.verdict),
                field(opt(first)),
                field(opt(report.suspect.as_deref())),
            ));
        }
    }

    let s = &run.summary;
    out.push('\n');
    out.push_str(&format!("SUMMARY\tentities\t{}\n", s.entities));
    out.push_str(&format!("PASS\t{}\n", s.pass));
    out.push_str(&format!("FAIL\t{}\n", s.fail));
    out.push_str(&format!("INCOMPLETE\t{}\n", s.incomplete));
    for source in run.sources.iter().filter(|s| s.error.is_some()) {
        out.push_str(&format!(
            "UNREADABLE\t{}\t{}\n",
            field(&source.source),
            field(opt(source.error.as_deref())),
        ));
    }
    for (label, count) in s.causes_by_count() {
        out.push_str(&format!("CAUSE\t{}\t{}\n", field(label), count));
    }
    for (node, count) in s.first_checkpoints_by_count() {
        out.push_str(&format!("FIRST\t{}\t{}\n", field(node), count));
    }
    for (flag, count) in &s.flags {
        out.push_str(&format!("FLAG\t{}\t{}\n", field(flag), count));
    }
    if let Some(best) = &run.best {
        out.push_str(&format!(
            "BEST\t{}\t{}\t{}\t{}\n",
            best.metric,
            num(best.value),
            field(&best.variant),
            field(opt(best.experiment.as_deref())),
        ));
    }
    out
}

/// Render checkpoint statistics as TSV sorted by `(layer, checkpoint)`
#[must_use]
pub fn render_stats(steps_seen: u64, summaries: &[CheckpointSummary]) -> String {
    let mut out = format!("steps_seen\t{}\n", steps_seen);
    out.push_str("layer\tcheckpoint\tevents\tdistinct_hashes\tconst_after_first\tmin\tmax\tmean\tnan\tinf\n");
    for s in summaries {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            opt(s.layer),
            s.checkpoint,
            s.events,
            s.distinct_hashes,
            s.const_after_first,
            s.min.map_or_else(|| "-".to_string(), num),
            s.max.map_or_else(|| "-".to_string(), num),
            s.mean.map_or_else(|| "-".to_string(), num),
            s.nan_count,
            s.inf_count,
        ));
    }
    out
}

fn percent(part: u64, whole: u64) -> String {
    if whole == 0 {
        "0.0%".to_string()
    } else {
        format!("{:.1}%", part as f64 * 100.0 / whole as f64)
    }
}

fn render_markdown(run: &AnalysisRun) -> String {
    let s = &run.summary;
    let mut out = String::new();
    out.push_str(&format!("# Divergence analysis: {}\n\n", run.schema));
    out.push_str(&format!(
        "Generated {}\n\n",
        run.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    out.push_str("## Summary\n\n");
    out.push_str(&format!("- **Sources**: {}\n", run.sources.len()));
    out.push_str(&format!("- **Entities**: {}\n", s.entities));
    out.push_str(&format!("- **PASS**: {} ({})\n", s.pass, percent(s.pass, s.entities)));
    out.push_str(&format!("- **FAIL**: {} ({})\n", s.fail, percent(s.fail, s.entities)));
    out.push_str(&format!(
        "- **INCOMPLETE**: {} ({})\n",
        s.incomplete,
        percent(s.incomplete, s.entities)
    ));
    if s.undetermined > 0 {
        out.push_str(&format!("- **Undetermined rows**: {}\n", s.undetermined));
    }

    out.push_str("\n## Root cause breakdown\n\n");
    if s.causes.is_empty() {
        out.push_str("No divergences.\n");
    } else {
        out.push_str("| Cause | Count | Share |\n|---|---|---|\n");
        for (label, count) in s.causes_by_count() {
            out.push_str(&format!("| {} | {} | {} |\n", label, count, percent(count, s.fail)));
        }
    }

    if !s.first_checkpoints.is_empty() {
        out.push_str("\n## First failure breakdown\n\n| Checkpoint | Count |\n|---|---|\n");
        for (node, count) in s.first_checkpoints_by_count() {
            out.push_str(&format!("| {} | {} |\n", node, count));
        }
    }

    if !s.flags.is_empty() {
        out.push_str("\n## Flags\n\n| Flag | Entities |\n|---|---|\n");
        for (flag, count) in &s.flags {
            out.push_str(&format!("| {} | {} |\n", flag, count));
        }
    }

    out.push_str("\n## Per-source summary\n\n");
    out.push_str("| Source | Variant | Entities | PASS | FAIL | INCOMPLETE | Dropped lines |\n");
    out.push_str("|---|---|---|---|---|---|---|\n");
    for source in &run.sources {
        let summary = source.summary();
        let name = match (&source.error, source.found) {
            (Some(error), _) => format!("{} (unreadable: {})", source.source, error),
            (None, true) => source.source.clone(),
            (None, false) => format!("{} (not found)", source.source),
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            name,
            opt(source.variant.as_deref()),
            summary.entities,
            summary.pass,
            summary.fail,
            summary.incomplete,
            source.load.dropped,
        ));
    }

    out.push_str("\n## Detailed results\n\n");
    out.push_str("| Source | Entity | First divergence | Metric | Verdict |\n|---|---|---|---|---|\n");
    for source in &run.sources {
        for report in &source.reports {
            let (node, metric) = match &report.first_divergence {
                Some(first) => (
                    first.node_key().to_string(),
                    first.mae.map_or_else(|| first.outcome.label().to_string(), num),
                ),
                None => ("-".to_string(), "-".to_string()),
            };
            let verdict = match &report.suspect {
                Some(suspect) => format!("{} ({})", report.verdict, suspect),
                None => report.verdict.clone(),
            };
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                source.source, report.entity, node, metric, verdict
            ));
        }
    }

    if let Some(best) = &run.best {
        out.push_str("\n## Best variant\n\n");
        out.push_str(&format!(
            "- **{}** = {} by `{}`",
            best.variant,
            num(best.value),
            best.metric
        ));
        if let Some(experiment) = &best.experiment {
            out.push_str(&format!(" (experiment {})", experiment));
        }
        out.push('\n');
    }

    out.push_str("\n## Recommendation\n\n");
    match s.primary_cause() {
        Some((label, _)) => {
            out.push_str(&format!("- **Primary root cause**: {}\n", label));
            let hint = run
                .hint
                .as_deref()
                .unwrap_or("Continue bisecting from the identified first failure point.");
            out.push_str(&format!("- **Recommended focus**: {}\n", hint));
        }
        None => out.push_str("- **Primary root cause**: PASS\n"),
    }
    out
}
