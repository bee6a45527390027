//! Retraining pipeline orchestration
//!
//! Runs the steps strictly in order:
//! `SelectDataset → Evaluate → Decide → AwaitConfirmation → [FineTune → Promote] → Done`.
//! Any failure ends the run in `Failed` with the step attached to the error.
//! State already persisted (history rows, dataset pointer, deployed model) is
//! left as it was when the failure happened.
//!
//! The retrain recommendation is advisory; a [`Confirmation`] decides whether
//! fine-tuning actually runs, so the same state machine serves the
//! interactive CLI and unattended callers.

mod lock;
#[cfg(test)]
mod tests;

pub use lock::RunLock;

use crate::artifacts::{ArtifactStore, CandidateArtifact, RunId};
use crate::config::PipelineConfig;
use crate::dataset::{AnnotationExporter, DatasetPreparer, DatasetSource, LabelStudioExporter};
use crate::engine::{DetectionEngine, YoloCli};
use crate::error::{PipelineStage, Result};
use crate::evaluator::Evaluator;
use crate::finetune::FineTuner;
use crate::history::EvaluationHistory;
use crate::models::{MergeReport, PromotionOutcome, RetrainDecision};
use crate::observability::{PipelineLogger, PipelineMetrics};
use crate::policy::RetrainPolicy;
use crate::promotion::PromotionGate;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Decides whether to fine-tune after seeing the recommendation
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, metric: f64, decision: &RetrainDecision) -> bool;
}

/// Fixed answer for unattended runs
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirmation(pub bool);

#[async_trait]
impl Confirmation for FixedConfirmation {
    async fn confirm(&self, _metric: f64, _decision: &RetrainDecision) -> bool {
        self.0
    }
}

/// Follows the recommendation as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct FollowRecommendation;

#[async_trait]
impl Confirmation for FollowRecommendation {
    async fn confirm(&self, _metric: f64, decision: &RetrainDecision) -> bool {
        decision.recommended
    }
}

/// Summary of one completed run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub final_stage: PipelineStage,
    pub dataset: PathBuf,
    pub metric: f64,
    /// Last metric in history before this run appended its own
    pub previous_metric: Option<f64>,
    pub decision: RetrainDecision,
    pub confirmed: bool,
    pub merge: Option<MergeReport>,
    pub candidate: Option<PathBuf>,
    pub promotion: Option<PromotionOutcome>,
    pub pruned_candidates: usize,
}

impl PipelineReport {
    pub fn promoted(&self) -> bool {
        self.promotion.as_ref().map(|p| p.promoted).unwrap_or(false)
    }
}

/// The retraining control loop wired from one configuration
pub struct Pipeline {
    preparer: DatasetPreparer,
    evaluator: Evaluator,
    policy: RetrainPolicy,
    history: EvaluationHistory,
    store: ArtifactStore,
    finetuner: FineTuner,
    gate: PromotionGate,
    lock_file: PathBuf,
    candidates_to_keep: usize,
}

impl Pipeline {
    /// Wire every component from `config` around `engine`
    pub fn new(config: &PipelineConfig, engine: Arc<dyn DetectionEngine>) -> Self {
        let paths = &config.paths;
        let store = ArtifactStore::new(&paths.deployed_model, &paths.candidates_dir);
        let evaluator = Evaluator::new(engine.clone());

        Self {
            preparer: DatasetPreparer::new(config.dataset.clone(), &paths.exports_root),
            evaluator: evaluator.clone(),
            policy: RetrainPolicy::new(config.policy),
            history: EvaluationHistory::new(&paths.history_file, &paths.last_dataset_file),
            store: store.clone(),
            finetuner: FineTuner::new(
                engine,
                store.clone(),
                config.dataset.clone(),
                &paths.finetune_pool,
                &paths.historical_pool,
                config.finetune.clone(),
                &config.engine,
            ),
            gate: PromotionGate::new(evaluator, store, config.promotion),
            lock_file: paths.lock_file.clone(),
            candidates_to_keep: config.promotion.candidates_to_keep,
        }
    }

    /// Production wiring: `yolo` CLI engine, plus the annotation exporter
    /// when an API token is configured
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let engine: Arc<dyn DetectionEngine> = Arc::new(YoloCli::new(config.engine.clone()));
        let pipeline = Self::new(config, engine);

        if config.export.api_token.is_some() {
            let exporter = LabelStudioExporter::new(&config.export)?;
            Ok(pipeline.with_exporter(Arc::new(exporter)))
        } else {
            Ok(pipeline)
        }
    }

    /// Enable auto dataset mode
    pub fn with_exporter(mut self, exporter: Arc<dyn AnnotationExporter>) -> Self {
        self.preparer = self.preparer.with_exporter(exporter);
        self
    }

    pub fn history(&self) -> &EvaluationHistory {
        &self.history
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn preparer(&self) -> &DatasetPreparer {
        &self.preparer
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn policy(&self) -> &RetrainPolicy {
        &self.policy
    }

    /// Run the full loop once
    pub async fn run(
        &self,
        source: &DatasetSource,
        confirmation: &dyn Confirmation,
    ) -> Result<PipelineReport> {
        let _lock = RunLock::acquire(&self.lock_file)?;
        let run_id = RunId::generate();
        let logger = PipelineLogger::new(run_id.as_str());
        logger.log_started(self.store.deployed_path());

        let mut stage = PipelineStage::SelectDataset;
        match self
            .run_steps(&run_id, &logger, source, confirmation, &mut stage)
            .await
        {
            Ok(report) => {
                logger.log_finished(report.final_stage, report.confirmed);
                Ok(report)
            }
            Err(e) => {
                let e = e.at_stage(stage);
                logger.log_failed(stage, &e.to_string());
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        run_id: &RunId,
        logger: &PipelineLogger,
        source: &DatasetSource,
        confirmation: &dyn Confirmation,
        stage: &mut PipelineStage,
    ) -> Result<PipelineReport> {
        let metrics = PipelineMetrics::new();

        enter(stage, PipelineStage::SelectDataset, logger);
        let dataset = self.preparer.prepare(source, logger).await?;

        enter(stage, PipelineStage::Evaluate, logger);
        let deployed = self.store.require_deployed()?.to_path_buf();
        let previous_metric = self.history.last_metric()?;
        let metric = self
            .evaluator
            .evaluate(&deployed, &dataset.descriptor_path)
            .await?;
        self.history.append(metric)?;
        metrics.record_evaluation(metric);
        logger.log_evaluation(&deployed, &dataset.root, metric);

        enter(stage, PipelineStage::Decide, logger);
        let decision = self.policy.should_retrain(metric, previous_metric);
        metrics.record_decision(&decision);
        logger.log_decision(metric, previous_metric, &decision);
        let previous_dataset = self.history.last_dataset_used()?;
        self.history.record_dataset_used(&dataset.root)?;

        enter(stage, PipelineStage::AwaitConfirmation, logger);
        let confirmed = confirmation.confirm(metric, &decision).await;

        let mut report = PipelineReport {
            run_id: run_id.to_string(),
            final_stage: PipelineStage::Done,
            dataset: dataset.root.clone(),
            metric,
            previous_metric,
            decision,
            confirmed,
            merge: None,
            candidate: None,
            promotion: None,
            pruned_candidates: 0,
        };

        if !confirmed {
            logger.log_declined(report.decision.recommended);
            *stage = PipelineStage::Done;
            return Ok(report);
        }

        enter(stage, PipelineStage::FineTune, logger);
        let (merge, candidate) = self
            .finetuner
            .fine_tune(previous_dataset.as_deref(), &dataset.root, run_id)
            .await?;
        logger.log_merge(self.finetuner.pool_dir(), &merge);
        logger.log_candidate(&candidate.weights);
        report.merge = Some(merge);
        report.candidate = Some(candidate.weights.clone());

        enter(stage, PipelineStage::Promote, logger);
        let outcome = self
            .gate
            .compare_and_promote(&dataset.descriptor_path, Some(&candidate))
            .await?;
        metrics.record_promotion(&outcome);
        logger.log_promotion(&outcome);
        report.promotion = Some(outcome);
        report.pruned_candidates = self.store.prune(self.candidates_to_keep);

        *stage = PipelineStage::Done;
        Ok(report)
    }

    /// Evaluate `model` (default: deployed) on an existing dataset folder,
    /// optionally appending the result to history
    pub async fn evaluate(&self, dataset_root: &Path, model: Option<&Path>, record: bool) -> Result<f64> {
        let dataset = self.preparer.describe(dataset_root)?;
        let model = match model {
            Some(model) => model.to_path_buf(),
            None => self.store.require_deployed()?.to_path_buf(),
        };

        let metric = self.evaluator.evaluate(&model, &dataset.descriptor_path).await?;
        PipelineMetrics::new().record_evaluation(metric);

        if record {
            let _lock = RunLock::acquire(&self.lock_file)?;
            self.history.append(metric)?;
            info!(metric = metric, history = %self.history.history_file().display(), "Evaluation recorded");
        }
        Ok(metric)
    }

    /// Merge the pool and train a candidate outside a full run
    pub async fn fine_tune(
        &self,
        previous: Option<&Path>,
        current: &Path,
    ) -> Result<(MergeReport, CandidateArtifact)> {
        let _lock = RunLock::acquire(&self.lock_file)?;
        let run_id = RunId::generate();
        let logger = PipelineLogger::new(run_id.as_str());

        let (merge, candidate) = self
            .finetuner
            .fine_tune(previous, current, &run_id)
            .await
            .map_err(|e| e.at_stage(PipelineStage::FineTune))?;
        logger.log_merge(self.finetuner.pool_dir(), &merge);
        logger.log_candidate(&candidate.weights);
        Ok((merge, candidate))
    }

    /// Standalone promotion gate on the newest candidate
    pub async fn promote_latest(&self, dataset_root: &Path) -> Result<PromotionOutcome> {
        let _lock = RunLock::acquire(&self.lock_file)?;
        let dataset = self.preparer.describe(dataset_root)?;

        let candidate = self.store.latest_candidate()?;
        if candidate.is_none() {
            warn!(
                candidates_dir = %self.store.candidates_dir().display(),
                "No trained candidate found"
            );
        }

        let outcome = self
            .gate
            .compare_and_promote(&dataset.descriptor_path, candidate.as_ref())
            .await
            .map_err(|e| e.at_stage(PipelineStage::Promote))?;

        let logger = PipelineLogger::new(
            candidate
                .as_ref()
                .map(|c| c.run_id.to_string())
                .unwrap_or_default(),
        );
        PipelineMetrics::new().record_promotion(&outcome);
        logger.log_promotion(&outcome);
        Ok(outcome)
    }
}

fn enter(current: &mut PipelineStage, next: PipelineStage, logger: &PipelineLogger) {
    *current = next;
    logger.log_stage(next);
}
