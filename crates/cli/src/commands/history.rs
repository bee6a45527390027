//! Evaluation and history commands

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use retrain_lib::config::PolicyConfig;
use retrain_lib::Pipeline;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_delta, color_metric, color_recommendation, print_json, print_success, print_table,
    OutputFormat,
};

/// Row for the history table
#[derive(Tabled, Serialize)]
struct HistoryRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "mAP50")]
    metric: String,
    #[tabled(rename = "Delta")]
    delta: String,
}

/// History entry as emitted in JSON
#[derive(Serialize)]
struct HistoryEntry {
    timestamp: DateTime<Utc>,
    metric: f64,
    delta: Option<f64>,
}

/// Show recorded evaluations with the change between consecutive runs
pub fn show_history(pipeline: &Pipeline, policy: PolicyConfig, format: OutputFormat) -> Result<()> {
    let records = pipeline
        .history()
        .records()
        .context("Failed to read evaluation history")?;

    let entries: Vec<HistoryEntry> = records
        .iter()
        .enumerate()
        .map(|(i, r)| HistoryEntry {
            timestamp: r.timestamp,
            metric: r.metric,
            delta: i.checked_sub(1).map(|prev| r.metric - records[prev].metric),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&entries),
        OutputFormat::Table => {
            println!("{}", "Evaluation History".bold());
            println!(
                "File: {}\n",
                pipeline.history().history_file().display()
            );

            let rows: Vec<HistoryRow> = entries
                .iter()
                .enumerate()
                .map(|(i, e)| HistoryRow {
                    index: i + 1,
                    timestamp: e.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    metric: color_metric(e.metric, policy.abs_threshold),
                    delta: color_delta(e.delta, policy.drop_threshold),
                })
                .collect();
            print_table(&rows, format, "No evaluations recorded yet");

            if let Ok(Some(dataset)) = pipeline.history().last_dataset_used() {
                println!("\nLast dataset: {}", dataset.display());
            }
        }
    }

    Ok(())
}

/// Result of a standalone evaluation
#[derive(Serialize)]
struct EvaluationSummary<'a> {
    model: &'a Path,
    dataset: &'a Path,
    metric: f64,
    recorded: bool,
    recommended: bool,
    reason: String,
}

/// Evaluate a model on a dataset folder without running the rest of the loop
pub async fn evaluate(
    pipeline: &Pipeline,
    policy: PolicyConfig,
    dataset: &Path,
    model: Option<&Path>,
    record: bool,
    format: OutputFormat,
) -> Result<()> {
    let last = pipeline
        .history()
        .last_metric()
        .context("Failed to read evaluation history")?;

    let metric = pipeline
        .evaluate(dataset, model, record)
        .await
        .context("Evaluation failed")?;
    let decision = pipeline.policy().should_retrain(metric, last);

    let model = model.unwrap_or_else(|| pipeline.store().deployed_path());

    match format {
        OutputFormat::Json => print_json(&EvaluationSummary {
            model,
            dataset,
            metric,
            recorded: record,
            recommended: decision.recommended,
            reason: decision.reason,
        }),
        OutputFormat::Table => {
            println!("Model:          {}", model.display());
            println!("Dataset:        {}", dataset.display());
            println!("mAP50:          {}", color_metric(metric, policy.abs_threshold));
            println!(
                "Recommendation: {} ({})",
                color_recommendation(decision.recommended),
                decision.reason
            );
            if record {
                print_success("Result appended to evaluation history");
            }
        }
    }

    Ok(())
}
