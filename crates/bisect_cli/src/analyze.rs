//! Per-source analysis pipeline.
//!
//! Every source is loaded, correlated, walked and classified on its own;
//! entity identity never crosses a source boundary. Sources run in
//! parallel and are reported in input order.

use crate::config::Resolved;
use bisect_log::{LineDecoder, LoadError, TraceLoader};
use bisect_policy::Classifier;
use bisect_replay::{Correlator, PipelineWalker, StatsCollector};
use bisect_report::{AnalysisRun, FamilyMatch, FamilyPattern, SourceReport, render_stats, select_best};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Everything needed to turn one trace file into a [`SourceReport`]
pub struct Pipeline {
    decoder: LineDecoder,
    correlator: Correlator,
    walker: PipelineWalker,
    classifier: Classifier,
    family: Option<FamilyPattern>,
}

impl Pipeline {
    /// Build the pipeline from resolved settings
    #[must_use]
    pub fn new(resolved: &Resolved) -> Self {
        let preset = &resolved.preset;
        Self {
            decoder: LineDecoder::new(preset.fields.clone()),
            correlator: Correlator::new().with_aliases(preset.aliases.clone()),
            walker: PipelineWalker::new(preset.schema.clone(), preset.phases.clone())
                .with_sentinels(preset.sentinels.clone())
                .with_default_threshold(resolved.threshold),
            classifier: Classifier::new(resolved.table.clone()),
            family: resolved.family.clone(),
        }
    }

    /// Sweep identity of a source; `None` if a family pattern rejects it
    #[must_use]
    pub fn identify(&self, path: &Path) -> Option<FamilyMatch> {
        match &self.family {
            Some(pattern) => {
                let found = pattern.match_path(path);
                if found.is_none() {
                    tracing::warn!(path = %path.display(), "source does not match the family pattern, skipping");
                }
                found
            }
            None => Some(FamilyMatch::from_stem(path)),
        }
    }

    /// Analyze one source; `None` when the family pattern excludes it.
    ///
    /// A source that exists but cannot be read is reported as unreadable so
    /// the remaining sources still count.
    #[must_use]
    pub fn run_source(&self, path: &Path) -> Option<SourceReport> {
        let identity = self.identify(path)?;
        let mut report = self.load_source(path, &identity).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), error = %err, "trace source unreadable, skipping");
            let message = match err {
                LoadError::Io { error, .. } => error.to_string(),
            };
            SourceReport::unreadable(path.display().to_string(), message)
        });
        report.experiment = identity.experiment;
        report.variant = Some(identity.variant);
        Some(report)
    }

    fn load_source(&self, path: &Path, identity: &FamilyMatch) -> Result<SourceReport, LoadError> {
        let decoder = match &identity.entity {
            Some(entity) => {
                let mut fields = self.decoder.fields().clone();
                fields.fallback_entity = Some(entity.clone());
                LineDecoder::new(fields)
            }
            None => self.decoder.clone(),
        };

        let label = path.display().to_string();
        let report = match TraceLoader::open(path, decoder)? {
            None => SourceReport::missing(label),
            Some(mut loader) => {
                let correlation = self.correlator.correlate(loader.by_ref());
                let mut report = SourceReport::new(label);
                report.load = loader.finish()?;
                report.reports = correlation
                    .traces
                    .values()
                    .map(|trace| self.classifier.classify(self.walker.walk(trace)))
                    .collect();
                report
            }
        };
        Ok(report)
    }
}

/// Analyze every input and assemble the run.
///
/// A variant sweep is evaluated when a metric or family pattern is
/// configured, or when more than one input is given. Missing and unreadable
/// sources are kept in the run as empty reports.
#[must_use]
pub fn analyze(inputs: &[PathBuf], resolved: &Resolved, progress: bool) -> AnalysisRun {
    let pipeline = Pipeline::new(resolved);
    let bar = progress_bar(inputs.len(), progress);

    let sources: Vec<SourceReport> = inputs
        .par_iter()
        .filter_map(|path| {
            let report = pipeline.run_source(path);
            bar.inc(1);
            report
        })
        .collect();
    bar.finish_and_clear();

    let sweep = resolved.metric.is_some() || resolved.family.is_some() || inputs.len() > 1;
    let best = if sweep {
        let metric = resolved.metric.clone().unwrap_or_default();
        select_best(&sources, &metric)
    } else {
        None
    };

    let run = AnalysisRun::new(resolved.preset.schema.name.clone(), sources).with_best(best);
    let hint = run
        .summary
        .primary_cause()
        .and_then(|(label, _)| resolved.table.hint_for_label(label))
        .map(str::to_string);
    run.with_hint(hint)
}

fn progress_bar(len: usize, enabled: bool) -> ProgressBar {
    if !enabled || len < 2 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} sources") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

/// Per-checkpoint statistics of one layer trace.
///
/// Records without entity or phase keys are accepted; they are treated as a
/// single entity in a single phase.
///
/// # Errors
///
/// Returns error if the source exists but cannot be read. A missing source
/// yields `Ok(None)`.
pub fn stats(path: &Path, resolved: &Resolved) -> Result<Option<String>, LoadError> {
    let mut fields = resolved.preset.fields.clone();
    fields.fallback_entity.get_or_insert_with(|| "trace".to_string());
    fields.fallback_phase.get_or_insert_with(|| "trace".to_string());

    let Some(mut loader) = TraceLoader::open(path, LineDecoder::new(fields))? else {
        return Ok(None);
    };
    let mut collector = StatsCollector::new();
    collector.extend(loader.by_ref().map(|event| resolved.preset.aliases.apply(event)));
    loader.finish()?;
    Ok(Some(render_stats(collector.steps_seen(), &collector.finish())))
}

/// Metric label used in the stderr summary
#[must_use]
pub fn metric_name(resolved: &Resolved) -> String {
    resolved.metric.clone().unwrap_or_default().to_string()
}

/// True when at least one source existed and was read
#[must_use]
pub fn any_usable(run: &AnalysisRun) -> bool {
    run.sources.iter().any(SourceReport::usable)
}
