//! Retrain recommendation policy
//!
//! Pure function of the current mAP50 and the previous one. Rules are
//! evaluated in order and the first match wins:
//! 1. no previous metric: baseline, no recommendation
//! 2. current below the absolute threshold: retrain
//! 3. drop from the previous run beyond the drop threshold: retrain
//! 4. otherwise: stable

use crate::config::PolicyConfig;
use crate::models::RetrainDecision;

/// Threshold-based drift detector
#[derive(Debug, Clone, Copy)]
pub struct RetrainPolicy {
    /// Metric below this always recommends retraining
    pub abs_threshold: f64,
    /// Delta to the previous run below this recommends retraining
    pub drop_threshold: f64,
}

impl RetrainPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            abs_threshold: config.abs_threshold,
            drop_threshold: config.drop_threshold,
        }
    }

    /// Recommend whether to fine-tune given the current and previous mAP50
    pub fn should_retrain(&self, current: f64, last: Option<f64>) -> RetrainDecision {
        let Some(last) = last else {
            return RetrainDecision::keep("baseline run, no history to compare");
        };

        if current < self.abs_threshold {
            return RetrainDecision::retrain(format!(
                "current mAP50 ({current:.4}) is below absolute threshold ({:.2})",
                self.abs_threshold
            ));
        }

        let delta = current - last;
        if delta < self.drop_threshold {
            return RetrainDecision::retrain(format!(
                "performance dropped by {delta:.4} (threshold: {:.2})",
                self.drop_threshold
            ));
        }

        RetrainDecision::keep("performance stable")
    }
}

impl Default for RetrainPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}
