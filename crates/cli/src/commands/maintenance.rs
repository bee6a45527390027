//! Single-step commands: prepare, reconcile, finetune, promote

use anyhow::{Context, Result};
use colored::Colorize;
use retrain_lib::dataset::reconcile_export;
use retrain_lib::{DatasetSource, Pipeline, PipelineLogger, RunId};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::output::{format_metric, print_info, print_json, print_success, print_warning, OutputFormat};

/// Write the evaluation descriptor for a dataset, exporting first in auto mode
pub async fn prepare(pipeline: &Pipeline, source: DatasetSource, format: OutputFormat) -> Result<()> {
    let logger = PipelineLogger::new(RunId::generate().as_str());
    let prepared = pipeline
        .preparer()
        .prepare(&source, &logger)
        .await
        .context("Dataset preparation failed")?;

    #[derive(Serialize)]
    struct Prepared<'a> {
        root: &'a Path,
        descriptor: &'a Path,
        class_count: usize,
        reconcile: Option<retrain_lib::ReconcileReport>,
    }

    match format {
        OutputFormat::Json => print_json(&Prepared {
            root: &prepared.root,
            descriptor: &prepared.descriptor_path,
            class_count: prepared.descriptor.class_count(),
            reconcile: prepared.reconcile,
        }),
        OutputFormat::Table => {
            if let Some(report) = &prepared.reconcile {
                print_reconcile(report);
            }
            print_success(&format!(
                "Descriptor written: {} ({} classes)",
                prepared.descriptor_path.display(),
                prepared.descriptor.class_count()
            ));
        }
    }
    Ok(())
}

/// Align an existing export with original images
pub fn reconcile(
    pipeline: &Pipeline,
    export_dir: &Path,
    originals_dir: &Path,
    format: OutputFormat,
) -> Result<()> {
    let report = reconcile_export(export_dir, originals_dir, pipeline.preparer().layout())
        .with_context(|| format!("Failed to reconcile {}", export_dir.display()))?;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => print_reconcile(&report),
    }
    Ok(())
}

fn print_reconcile(report: &retrain_lib::ReconcileReport) {
    println!("{}", "Export Reconciliation".bold());
    println!("{}", "-".repeat(40));
    println!("Labels checked:   {}", report.labels_checked);
    println!("Images copied:    {}", report.images_copied.to_string().green());
    if report.orphans_deleted > 0 {
        print_warning(&format!(
            "{} orphan label(s) deleted (no matching image)",
            report.orphans_deleted
        ));
    }
}

/// Merge the fine-tune pool and train a candidate
pub async fn finetune(
    pipeline: &Pipeline,
    dataset: &Path,
    previous: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let previous = match previous {
        Some(p) => Some(p),
        None => pipeline
            .history()
            .last_dataset_used()
            .context("Failed to read dataset pointer")?,
    };

    let (merge, candidate) = pipeline
        .fine_tune(previous.as_deref(), dataset)
        .await
        .context("Fine-tuning failed")?;

    #[derive(Serialize)]
    struct FineTuned<'a> {
        run_id: String,
        weights: &'a Path,
        merge: retrain_lib::MergeReport,
    }

    match format {
        OutputFormat::Json => print_json(&FineTuned {
            run_id: candidate.run_id.to_string(),
            weights: &candidate.weights,
            merge,
        }),
        OutputFormat::Table => {
            print_info(&format!(
                "Pool: {} new + {} historical pairs added ({} images total)",
                merge.new_pairs_added, merge.historical_pairs_added, merge.pool_size
            ));
            print_success(&format!("Candidate trained: {}", candidate.weights.display()));
        }
    }
    Ok(())
}

/// Compare the newest candidate with the deployed model and promote on improvement
pub async fn promote(pipeline: &Pipeline, dataset: &Path, format: OutputFormat) -> Result<()> {
    let outcome = pipeline
        .promote_latest(dataset)
        .await
        .context("Promotion failed")?;

    match format {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Table => {
            if !outcome.was_compared() {
                print_warning("No candidate model found, nothing to compare");
                return Ok(());
            }
            println!("Deployed mAP50:  {}", format_metric(outcome.deployed_metric));
            println!("Candidate mAP50: {}", format_metric(outcome.candidate_metric));
            if outcome.promoted {
                print_success("Candidate promoted to deployed");
            } else {
                print_info("Candidate not better by the required margin, deployed model kept");
            }
        }
    }
    Ok(())
}
