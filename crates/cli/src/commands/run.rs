//! Full pipeline run

use anyhow::{Context, Result};
use colored::Colorize;
use retrain_lib::config::PolicyConfig;
use retrain_lib::{Confirmation, DatasetSource, FixedConfirmation, Pipeline, PipelineReport};
use std::sync::Arc;

use crate::output::{
    color_delta, color_metric, color_recommendation, format_metric, print_info, print_json,
    print_success, print_warning, OutputFormat,
};
use crate::prompt::{InteractiveConfirmation, Prompter};

/// How the operator answered the run flags
pub struct RunArgs {
    /// Prompted for when absent
    pub source: Option<DatasetSource>,
    pub yes: bool,
    pub no: bool,
}

/// Run the whole loop, prompting for whatever the flags leave open
pub async fn run_pipeline(
    pipeline: &Pipeline,
    policy: PolicyConfig,
    args: RunArgs,
    format: OutputFormat,
) -> Result<()> {
    let prompter = Arc::new(Prompter::stdin());

    let source = match args.source {
        Some(source) => source,
        None => prompter.choose_dataset().await?,
    };

    let confirmation: Box<dyn Confirmation> = if args.yes {
        Box::new(FixedConfirmation(true))
    } else if args.no {
        Box::new(FixedConfirmation(false))
    } else {
        Box::new(InteractiveConfirmation::new(prompter, policy))
    };

    let report = pipeline
        .run(&source, confirmation.as_ref())
        .await
        .context("Pipeline run failed")?;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => print_report(&report, policy),
    }
    Ok(())
}

fn print_report(report: &PipelineReport, policy: PolicyConfig) {
    println!();
    println!("{}", "Pipeline Run".bold());
    println!("{}", "=".repeat(50));
    println!("Run:            {}", report.run_id.cyan());
    println!("Dataset:        {}", report.dataset.display());
    println!(
        "mAP50:          {}",
        color_metric(report.metric, policy.abs_threshold)
    );
    println!(
        "Previous:       {}",
        report
            .previous_metric
            .map(format_metric)
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "Delta:          {}",
        color_delta(
            report.previous_metric.map(|p| report.metric - p),
            policy.drop_threshold
        )
    );
    println!(
        "Recommendation: {} ({})",
        color_recommendation(report.decision.recommended),
        report.decision.reason
    );
    println!();

    if !report.confirmed {
        print_info("Fine-tuning not requested, deployed model unchanged");
        return;
    }

    if let Some(merge) = &report.merge {
        print_info(&format!(
            "Fine-tune pool: {} new + {} historical pairs added ({} images total)",
            merge.new_pairs_added, merge.historical_pairs_added, merge.pool_size
        ));
    }
    if let Some(candidate) = &report.candidate {
        print_info(&format!("Candidate: {}", candidate.display()));
    }

    match &report.promotion {
        Some(outcome) if outcome.promoted => print_success(&format!(
            "Candidate promoted ({} > {})",
            format_metric(outcome.candidate_metric),
            format_metric(outcome.deployed_metric)
        )),
        Some(outcome) if outcome.was_compared() => print_warning(&format!(
            "Candidate not promoted ({} vs deployed {})",
            format_metric(outcome.candidate_metric),
            format_metric(outcome.deployed_metric)
        )),
        _ => print_warning("No candidate to compare, deployed model unchanged"),
    }

    if report.pruned_candidates > 0 {
        print_info(&format!(
            "Removed {} old candidate(s)",
            report.pruned_candidates
        ));
    }
}
