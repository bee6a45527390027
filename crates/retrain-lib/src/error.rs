//! Error taxonomy for the retraining pipeline
//!
//! Variants are grouped the way failures are handled:
//! - configuration errors abort before any state is touched
//! - external engine errors abort the current step
//! - persistence errors carry the offending path

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline step a failure was raised from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    SelectDataset,
    Evaluate,
    Decide,
    AwaitConfirmation,
    FineTune,
    Promote,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::SelectDataset => "select_dataset",
            PipelineStage::Evaluate => "evaluate",
            PipelineStage::Decide => "decide",
            PipelineStage::AwaitConfirmation => "await_confirmation",
            PipelineStage::FineTune => "fine_tune",
            PipelineStage::Promote => "promote",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid dataset folder {root}: expected '{images}/' and '{labels}/' subfolders")]
    InvalidDataset {
        root: PathBuf,
        images: String,
        labels: String,
    },

    #[error("no deployed model found at {0}")]
    DeployedModelMissing(PathBuf),

    #[error("original image directory not found: {0}")]
    OriginalImagesMissing(PathBuf),

    #[error("no export directories found in {0}")]
    NoExportFound(PathBuf),

    #[error("failed to launch `{command}`: {source}")]
    EngineSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    EngineFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` reported errors: {stderr}")]
    EngineStderr { command: String, stderr: String },

    #[error("mAP50 not found in engine report for {model}")]
    MetricNotFound { model: PathBuf },

    #[error("training finished but no candidate weights at {0}")]
    CandidateMissing(PathBuf),

    #[error("annotation export failed: {0}")]
    Export(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset descriptor {path}: {message}")]
    Descriptor { path: PathBuf, message: String },

    #[error("another pipeline run holds the lock at {0}")]
    Locked(PathBuf),

    #[error("step {stage} failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Attach the pipeline step to an error; already staged errors are kept as-is
    pub fn at_stage(self, stage: PipelineStage) -> Self {
        match self {
            staged @ PipelineError::Stage { .. } => staged,
            other => PipelineError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Step a staged error was raised from
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// True for failures that stem from operator-supplied setup rather than the engine
    pub fn is_configuration(&self) -> bool {
        match self {
            PipelineError::Config(_)
            | PipelineError::InvalidDataset { .. }
            | PipelineError::DeployedModelMissing(_)
            | PipelineError::OriginalImagesMissing(_)
            | PipelineError::NoExportFound(_) => true,
            PipelineError::Stage { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}
