//! Core data models for the retraining pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One evaluation of the deployed model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    pub metric: f64,
}

/// Advisory retrain recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainDecision {
    pub recommended: bool,
    pub reason: String,
}

impl RetrainDecision {
    pub fn retrain(reason: impl Into<String>) -> Self {
        Self {
            recommended: true,
            reason: reason.into(),
        }
    }

    pub fn keep(reason: impl Into<String>) -> Self {
        Self {
            recommended: false,
            reason: reason.into(),
        }
    }
}

/// Result of comparing a candidate against the deployed model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionOutcome {
    pub promoted: bool,
    pub deployed_metric: f64,
    pub candidate_metric: f64,
    /// Candidate that was compared, if any existed
    pub candidate: Option<PathBuf>,
    /// SHA256 of the deployed artifact after the gate ran
    pub deployed_checksum: Option<String>,
}

impl PromotionOutcome {
    /// Nothing to compare: no candidate has been trained yet
    pub fn no_candidate() -> Self {
        Self {
            promoted: false,
            deployed_metric: f64::NAN,
            candidate_metric: f64::NAN,
            candidate: None,
            deployed_checksum: None,
        }
    }

    pub fn was_compared(&self) -> bool {
        self.candidate.is_some()
    }
}

/// Counters produced by aligning an export with its source images
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub labels_checked: usize,
    pub images_copied: usize,
    pub orphans_deleted: usize,
}

/// Counters produced by one fine-tune pool merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub new_pairs_found: usize,
    pub new_pairs_added: usize,
    pub historical_pairs_sampled: usize,
    pub historical_pairs_added: usize,
    pub pool_size: usize,
}
