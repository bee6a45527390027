//! Candidate vs deployed promotion gate

use crate::artifacts::{ArtifactStore, CandidateArtifact};
use crate::config::PromotionConfig;
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::models::PromotionOutcome;
use std::path::Path;
use tracing::{info, warn};

/// Evaluates both models on the same dataset and promotes on clear improvement
pub struct PromotionGate {
    evaluator: Evaluator,
    store: ArtifactStore,
    improvement_margin: f64,
}

impl PromotionGate {
    pub fn new(evaluator: Evaluator, store: ArtifactStore, config: PromotionConfig) -> Self {
        Self {
            evaluator,
            store,
            improvement_margin: config.improvement_margin,
        }
    }

    pub fn improvement_margin(&self) -> f64 {
        self.improvement_margin
    }

    /// True when `candidate` beats `deployed` by strictly more than the margin
    pub fn should_promote(&self, deployed: f64, candidate: f64) -> bool {
        candidate > deployed + self.improvement_margin
    }

    /// Compare `candidate` against the deployed model on `descriptor`
    ///
    /// Both evaluations run one after the other on the same dataset. On
    /// promotion the deployed file is swapped atomically; otherwise neither
    /// model is touched.
    pub async fn compare_and_promote(
        &self,
        descriptor: &Path,
        candidate: Option<&CandidateArtifact>,
    ) -> Result<PromotionOutcome> {
        let deployed = self.store.require_deployed()?.to_path_buf();

        let Some(candidate) = candidate.filter(|c| c.exists()) else {
            warn!("No candidate model found, skipping promotion");
            return Ok(PromotionOutcome::no_candidate());
        };

        let deployed_metric = self.evaluator.evaluate(&deployed, descriptor).await?;
        let candidate_metric = self
            .evaluator
            .evaluate(&candidate.weights, descriptor)
            .await?;

        info!(
            deployed_map50 = deployed_metric,
            candidate_map50 = candidate_metric,
            margin = self.improvement_margin,
            "Compared candidate against deployed model"
        );

        let mut outcome = PromotionOutcome {
            promoted: false,
            deployed_metric,
            candidate_metric,
            candidate: Some(candidate.weights.clone()),
            deployed_checksum: None,
        };

        if self.should_promote(deployed_metric, candidate_metric) {
            outcome.deployed_checksum = Some(self.store.promote(candidate)?);
            outcome.promoted = true;
        } else {
            info!(
                improvement = candidate_metric - deployed_metric,
                "Candidate not better by margin, deployed model kept"
            );
        }

        Ok(outcome)
    }
}
