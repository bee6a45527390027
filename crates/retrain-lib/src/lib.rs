//! Retraining control loop for an object-detection model
//!
//! This crate provides the core functionality for:
//! - Evaluation history persistence and the retrain decision policy
//! - Dataset preparation from annotation exports or existing folders
//! - Fine-tune pool construction and candidate training
//! - The candidate vs deployed promotion gate
//! - Pipeline orchestration and observability

pub mod artifacts;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod finetune;
mod fsutil;
pub mod history;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod promotion;

pub use artifacts::{ArtifactStore, CandidateArtifact, RunId};
pub use config::PipelineConfig;
pub use dataset::{DatasetPreparer, DatasetSource};
pub use engine::{DetectionEngine, YoloCli};
pub use error::{PipelineError, PipelineStage, Result};
pub use evaluator::Evaluator;
pub use finetune::FineTuner;
pub use fsutil::file_checksum;
pub use history::EvaluationHistory;
pub use models::*;
pub use observability::{PipelineLogger, PipelineMetrics};
pub use pipeline::{Confirmation, FixedConfirmation, FollowRecommendation, Pipeline, PipelineReport};
pub use policy::RetrainPolicy;
pub use promotion::PromotionGate;
