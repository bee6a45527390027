//! Detection model retraining CLI
//!
//! Evaluates the deployed model, recommends retraining on degradation,
//! fine-tunes a candidate on confirmation and promotes it on clear
//! improvement.

mod commands;
mod output;
mod prompt;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use commands::{history, maintenance, run};
use retrain_lib::{DatasetSource, Pipeline, PipelineConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Detection model retraining pipeline
#[derive(Parser)]
#[command(name = "retrain")]
#[command(author, version, about = "Retraining pipeline for the defect detection model", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./retrain.toml when present)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Write Prometheus metrics in text format to this file on exit
    #[arg(long, global = true)]
    pub metrics_textfile: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full evaluate → decide → fine-tune → promote loop
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Fine-tune without asking
        #[arg(long, conflicts_with = "no")]
        yes: bool,

        /// Stop after recording the evaluation, without asking
        #[arg(long)]
        no: bool,
    },

    /// Evaluate a model on a dataset folder
    Evaluate {
        /// Dataset folder in images/ + labels/ layout
        #[arg(long)]
        dataset: PathBuf,

        /// Model weights (defaults to the deployed model)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Append the result to the evaluation history
        #[arg(long)]
        record: bool,
    },

    /// Show the evaluation history
    History,

    /// Write the evaluation descriptor for a dataset
    Prepare {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Align an annotation export with original images and delete orphan labels
    Reconcile {
        /// Export folder containing labels/
        #[arg(long)]
        export: PathBuf,

        /// Folder with the original images
        #[arg(long)]
        originals: PathBuf,
    },

    /// Merge the fine-tune pool and train a candidate model
    Finetune {
        /// Dataset with the newly verified samples
        #[arg(long)]
        dataset: PathBuf,

        /// Previously evaluated dataset (defaults to the recorded pointer)
        #[arg(long)]
        previous: Option<PathBuf>,
    },

    /// Compare the newest candidate with the deployed model and promote it on improvement
    Promote {
        /// Dataset both models are evaluated on
        #[arg(long)]
        dataset: PathBuf,
    },
}

/// Dataset selection shared by `run` and `prepare`
#[derive(Args)]
pub struct SourceArgs {
    /// Export a fresh dataset from the annotation tool
    #[arg(long, requires = "originals", conflicts_with = "dataset")]
    pub auto: bool,

    /// Original images the export is aligned against (auto mode)
    #[arg(long, requires = "auto")]
    pub originals: Option<PathBuf>,

    /// Existing dataset folder in images/ + labels/ layout
    #[arg(long)]
    pub dataset: Option<PathBuf>,
}

impl SourceArgs {
    fn into_source(self) -> Option<DatasetSource> {
        match (self.auto, self.originals, self.dataset) {
            (true, Some(originals_dir), _) => Some(DatasetSource::Auto { originals_dir }),
            (_, _, Some(root)) => Some(DatasetSource::Manual { root }),
            _ => None,
        }
    }
}

enum Completion {
    Finished,
    Cancelled,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let metrics_textfile = cli.metrics_textfile.clone();

    // Polling the signal first registers the handler before any prompt is shown.
    let result = tokio::select! {
        biased;
        _ = tokio::signal::ctrl_c() => Ok(Completion::Cancelled),
        result = execute(cli) => result.map(|_| Completion::Finished),
    };

    if let Some(path) = metrics_textfile {
        if let Err(e) = write_metrics_textfile(&path) {
            output::print_warning(&format!("{e:#}"));
        }
    }

    match result {
        Ok(Completion::Finished) => ExitCode::SUCCESS,
        Ok(Completion::Cancelled) => {
            println!();
            output::print_warning("Cancelled, deployed model untouched");
            // A pending stdin read blocks runtime shutdown until the next line.
            std::process::exit(0)
        }
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    debug!(
        deployed_model = %config.paths.deployed_model.display(),
        history = %config.paths.history_file.display(),
        engine = %config.engine.program,
        "Configuration loaded"
    );
    let pipeline = Pipeline::from_config(&config).context("Failed to set up pipeline")?;
    let format = cli.format;

    match cli.command {
        Commands::Run { source, yes, no } => {
            let args = run::RunArgs {
                source: source.into_source(),
                yes,
                no,
            };
            run::run_pipeline(&pipeline, config.policy, args, format).await?;
        }
        Commands::Evaluate {
            dataset,
            model,
            record,
        } => {
            history::evaluate(&pipeline, config.policy, &dataset, model.as_deref(), record, format)
                .await?;
        }
        Commands::History => {
            history::show_history(&pipeline, config.policy, format)?;
        }
        Commands::Prepare { source } => {
            let source = source
                .into_source()
                .context("Either --dataset or --auto --originals is required")?;
            maintenance::prepare(&pipeline, source, format).await?;
        }
        Commands::Reconcile { export, originals } => {
            maintenance::reconcile(&pipeline, &export, &originals, format)?;
        }
        Commands::Finetune { dataset, previous } => {
            maintenance::finetune(&pipeline, &dataset, previous, format).await?;
        }
        Commands::Promote { dataset } => {
            maintenance::promote(&pipeline, &dataset, format).await?;
        }
    }

    Ok(())
}

fn write_metrics_textfile(path: &Path) -> Result<()> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    std::fs::write(path, buffer)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))
}
