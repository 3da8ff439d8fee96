//! BISECT.TRACE CLI
//!
//! Locates the first checkpoint where a probe phase stops agreeing with the
//! reference phase, for every entity of every trace source.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod analyze;
mod config;

use bisect_plan::{preset, preset_names};
use bisect_report::{AnalysisRun, Format, render};
use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use config::{AnalysisConfig, Overrides, Resolved, resolve};
use console::style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit status when no input produced anything to analyze
const EXIT_NO_INPUT: u8 = 2;

#[derive(Parser)]
#[command(name = "bisect")]
#[command(about = "BISECT.TRACE - first-divergence analysis of checkpoint traces", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose logging (repeat for trace level)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the first divergent checkpoint of every entity
    Analyze(AnalyzeArgs),
    /// Per-checkpoint statistics of a single layer trace
    Stats {
        /// Trace file
        input: PathBuf,
        #[command(flatten)]
        plan: PlanArgs,
        /// Write the table here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List built-in schemas
    Schemas {
        /// Print the full definition of one schema as JSON
        #[arg(long)]
        show: Option<String>,
    },
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Trace files, one source each
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[command(flatten)]
    plan: PlanArgs,
    /// Reference phase
    #[arg(long)]
    reference: Option<String>,
    /// Probe phase, repeatable; replaces the configured probes
    #[arg(long = "probe")]
    probes: Vec<String>,
    /// Sweep file name pattern with a `variant` group
    #[arg(long)]
    family: Option<String>,
    /// Sweep metric: fail-count, leading-mae or checkpoint-mae:<id>
    #[arg(long)]
    best_by: Option<String>,
    /// Output format: tsv, markdown or json
    #[arg(short, long, default_value = "tsv")]
    format: Format,
    /// Write the report here instead of stdout
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args)]
struct PlanArgs {
    /// Built-in schema
    #[arg(short, long)]
    schema: Option<String>,
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Default numeric threshold
    #[arg(short, long)]
    threshold: Option<f64>,
    /// Entity for records that carry none
    #[arg(long)]
    default_entity: Option<String>,
}

impl PlanArgs {
    fn resolve(self, overrides: Overrides) -> Result<Resolved> {
        let config = match &self.config {
            Some(path) => AnalysisConfig::load(path)?,
            None => AnalysisConfig::default(),
        };
        let overrides = Overrides {
            schema: self.schema,
            threshold: self.threshold,
            default_entity: self.default_entity,
            ..overrides
        };
        Ok(resolve(config, overrides)?)
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "bisect=info",
        1 => "bisect=debug",
        _ => "bisect=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Analyze(args) => run_analyze(args),
        Commands::Stats { input, plan, out } => {
            let resolved = plan.resolve(Overrides::default())?;
            match analyze::stats(&input, &resolved)? {
                Some(text) => {
                    emit(out.as_deref(), &text)?;
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("{} {} does not exist", style("error:").red().bold(), input.display());
                    Ok(ExitCode::from(EXIT_NO_INPUT))
                }
            }
        }
        Commands::Schemas { show } => {
            match show {
                Some(name) => {
                    let Some(preset) = preset(&name) else {
                        color_eyre::eyre::bail!("unknown schema {:?}", name);
                    };
                    println!("{}", serde_json::to_string_pretty(&preset)?);
                }
                None => {
                    for name in preset_names() {
                        let description = preset(name).map(|p| p.schema.description).unwrap_or_default();
                        println!("{}\t{}", name, description);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_analyze(args: AnalyzeArgs) -> Result<ExitCode> {
    let overrides = Overrides {
        reference: args.reference,
        probes: args.probes,
        family: args.family,
        best_by: args.best_by,
        ..Default::default()
    };
    let resolved = args.plan.resolve(overrides)?;
    let run = analyze::analyze(&args.inputs, &resolved, !args.quiet);

    if !analyze::any_usable(&run) {
        eprintln!(
            "{} no trace source exists, is readable or matches (checked {})",
            style("error:").red().bold(),
            args.inputs.len()
        );
        return Ok(ExitCode::from(EXIT_NO_INPUT));
    }

    let text = render(&run, args.format)?;
    emit(args.out.as_deref(), &text)?;
    print_summary(&run, &resolved);
    Ok(ExitCode::SUCCESS)
}

fn emit(out: Option<&Path>, text: &str) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, text).wrap_err_with(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn print_summary(run: &AnalysisRun, resolved: &Resolved) {
    let s = &run.summary;
    eprintln!(
        "{} {} entities: {} pass, {} fail, {} incomplete",
        style("summary").bold(),
        s.entities,
        style(s.pass).green(),
        style(s.fail).red(),
        style(s.incomplete).yellow(),
    );
    if let Some((label, count)) = s.primary_cause() {
        eprintln!("{} {} ({})", style("primary cause").bold(), style(label).cyan(), count);
    }
    if let Some(best) = &run.best {
        eprintln!(
            "{} {} ({} = {})",
            style("best variant").bold(),
            style(&best.variant).green(),
            analyze::metric_name(resolved),
            best.value
        );
    }
}
