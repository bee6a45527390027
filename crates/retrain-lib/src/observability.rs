//! Observability for the retraining pipeline
//!
//! Provides:
//! - Prometheus metrics (evaluation results, promotions, orphan cleanup, engine latency)
//! - Structured logging of pipeline events with tracing

use crate::error::PipelineStage;
use crate::models::{MergeReport, PromotionOutcome, ReconcileReport, RetrainDecision};
use prometheus::{
    register_gauge, register_histogram_vec, register_int_counter, Gauge, HistogramVec, IntCounter,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Engine runs range from seconds (validation) to hours (training)
const ENGINE_DURATION_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0,
];

static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    last_evaluation_map50: Gauge,
    deployed_map50: Gauge,
    candidate_map50: Gauge,
    evaluations: IntCounter,
    retrain_recommendations: IntCounter,
    promotions: IntCounter,
    orphan_labels_deleted: IntCounter,
    engine_duration_seconds: HistogramVec,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            last_evaluation_map50: register_gauge!(
                "retrain_last_evaluation_map50",
                "mAP50 of the deployed model in the most recent evaluation"
            )
            .expect("Failed to register last_evaluation_map50"),

            deployed_map50: register_gauge!(
                "retrain_deployed_map50",
                "Deployed model mAP50 measured by the last promotion gate"
            )
            .expect("Failed to register deployed_map50"),

            candidate_map50: register_gauge!(
                "retrain_candidate_map50",
                "Candidate model mAP50 measured by the last promotion gate"
            )
            .expect("Failed to register candidate_map50"),

            evaluations: register_int_counter!(
                "retrain_evaluations_total",
                "Total number of deployed model evaluations recorded"
            )
            .expect("Failed to register evaluations"),

            retrain_recommendations: register_int_counter!(
                "retrain_recommendations_total",
                "Total number of runs where retraining was recommended"
            )
            .expect("Failed to register retrain_recommendations"),

            promotions: register_int_counter!(
                "retrain_promotions_total",
                "Total number of candidate models promoted to deployed"
            )
            .expect("Failed to register promotions"),

            orphan_labels_deleted: register_int_counter!(
                "retrain_orphan_labels_deleted_total",
                "Total number of label files deleted for lack of a matching image"
            )
            .expect("Failed to register orphan_labels_deleted"),

            engine_duration_seconds: register_histogram_vec!(
                "retrain_engine_duration_seconds",
                "Wall time of external engine invocations",
                &["mode"],
                ENGINE_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register engine_duration_seconds"),
        }
    }
}

/// Handle to the process-wide pipeline metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn record_evaluation(&self, map50: f64) {
        self.inner().last_evaluation_map50.set(map50);
        self.inner().evaluations.inc();
    }

    pub fn record_decision(&self, decision: &RetrainDecision) {
        if decision.recommended {
            self.inner().retrain_recommendations.inc();
        }
    }

    pub fn record_promotion(&self, outcome: &PromotionOutcome) {
        if !outcome.was_compared() {
            return;
        }
        self.inner().deployed_map50.set(outcome.deployed_metric);
        self.inner().candidate_map50.set(outcome.candidate_metric);
        if outcome.promoted {
            self.inner().promotions.inc();
        }
    }

    pub fn add_orphan_labels(&self, count: usize) {
        self.inner().orphan_labels_deleted.inc_by(count as u64);
    }

    pub fn observe_engine_duration(&self, mode: &str, duration_secs: f64) {
        self.inner()
            .engine_duration_seconds
            .with_label_values(&[mode])
            .observe(duration_secs);
    }
}

/// Structured logger for pipeline events
///
/// Every event carries the run id so one run can be followed end to end.
#[derive(Clone)]
pub struct PipelineLogger {
    run_id: String,
}

impl PipelineLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_started(&self, deployed_model: &Path) {
        info!(
            event = "pipeline_started",
            run_id = %self.run_id,
            deployed_model = %deployed_model.display(),
            "Retraining pipeline started"
        );
    }

    pub fn log_stage(&self, stage: PipelineStage) {
        info!(
            event = "stage_entered",
            run_id = %self.run_id,
            stage = %stage,
            "Entering pipeline step"
        );
    }

    pub fn log_evaluation(&self, model: &Path, dataset: &Path, map50: f64) {
        info!(
            event = "evaluation_completed",
            run_id = %self.run_id,
            model = %model.display(),
            dataset = %dataset.display(),
            map50 = map50,
            "Model evaluated"
        );
    }

    pub fn log_decision(&self, map50: f64, last: Option<f64>, decision: &RetrainDecision) {
        info!(
            event = "retrain_decision",
            run_id = %self.run_id,
            map50 = map50,
            last_map50 = ?last,
            delta = ?last.map(|l| map50 - l),
            recommended = decision.recommended,
            reason = %decision.reason,
            "Retrain recommendation computed"
        );
    }

    pub fn log_reconcile(&self, export_dir: &Path, report: &ReconcileReport) {
        info!(
            event = "dataset_reconciled",
            run_id = %self.run_id,
            export_dir = %export_dir.display(),
            labels_checked = report.labels_checked,
            images_copied = report.images_copied,
            orphans_deleted = report.orphans_deleted,
            "Export aligned with original images"
        );
    }

    pub fn log_merge(&self, pool: &Path, report: &MergeReport) {
        info!(
            event = "finetune_pool_merged",
            run_id = %self.run_id,
            pool = %pool.display(),
            new_pairs_added = report.new_pairs_added,
            historical_pairs_added = report.historical_pairs_added,
            pool_size = report.pool_size,
            "Fine-tune pool updated"
        );
    }

    pub fn log_candidate(&self, weights: &Path) {
        info!(
            event = "candidate_trained",
            run_id = %self.run_id,
            weights = %weights.display(),
            "Candidate model trained"
        );
    }

    pub fn log_promotion(&self, outcome: &PromotionOutcome) {
        if outcome.promoted {
            info!(
                event = "promotion_decided",
                run_id = %self.run_id,
                promoted = true,
                deployed_map50 = outcome.deployed_metric,
                candidate_map50 = outcome.candidate_metric,
                checksum = ?outcome.deployed_checksum,
                "Candidate promoted to deployed"
            );
        } else {
            info!(
                event = "promotion_decided",
                run_id = %self.run_id,
                promoted = false,
                deployed_map50 = outcome.deployed_metric,
                candidate_map50 = outcome.candidate_metric,
                "Keeping deployed model"
            );
        }
    }

    pub fn log_finished(&self, stage: PipelineStage, confirmed: bool) {
        info!(
            event = "pipeline_finished",
            run_id = %self.run_id,
            last_stage = %stage,
            fine_tuned = confirmed,
            "Retraining pipeline finished"
        );
    }

    pub fn log_failed(&self, stage: PipelineStage, message: &str) {
        error!(
            event = "pipeline_failed",
            run_id = %self.run_id,
            stage = %stage,
            error = %message,
            "Retraining pipeline failed"
        );
    }

    pub fn log_declined(&self, recommended: bool) {
        if recommended {
            warn!(
                event = "retrain_declined",
                run_id = %self.run_id,
                "Retraining was recommended but declined"
            );
        } else {
            info!(
                event = "retrain_declined",
                run_id = %self.run_id,
                "Pipeline stopped before fine-tuning"
            );
        }
    }
}
