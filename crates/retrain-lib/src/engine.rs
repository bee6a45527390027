//! External detection engine boundary
//!
//! The training/evaluation engine is an opaque CLI. This module owns:
//! - the [`DetectionEngine`] seam the rest of the crate talks to
//! - the `yolo` command line implementation
//! - the grammar used to pull mAP50 out of a validation report

use crate::config::EngineConfig;
use crate::error::{PipelineError, Result};
use crate::observability::PipelineMetrics;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};

/// Column of the aggregate row holding mAP50 (class, images, instances, P, R, mAP50)
pub const AGGREGATE_MAP50_COLUMN: usize = 5;

/// Marker token that opens the aggregate ("all classes") row
pub const AGGREGATE_ROW_MARKER: &str = "all";

/// Summary key emitted by engines that print metrics as `key: value`
pub const SUMMARY_MAP50_KEY: &str = "mAP50(B):";

/// Parameters of a training run
#[derive(Debug, Clone)]
pub struct TrainRequest {
    /// Weights training starts from
    pub base_model: PathBuf,
    /// Dataset descriptor of the training pool
    pub descriptor: PathBuf,
    /// Directory holding all candidate runs
    pub project_dir: PathBuf,
    /// Run name; output lands in `project_dir/run_name`
    pub run_name: String,
    pub epochs: u32,
    pub lr0: f64,
}

impl TrainRequest {
    /// Weights file the engine produces for this run
    pub fn output_weights(&self) -> PathBuf {
        self.project_dir
            .join(&self.run_name)
            .join("weights")
            .join("best.pt")
    }
}

/// Out-of-process training/evaluation engine
#[async_trait]
pub trait DetectionEngine: Send + Sync {
    /// Run validation and return the captured textual report
    async fn validate(&self, model: &Path, descriptor: &Path) -> Result<String>;

    /// Run training with output streamed to the terminal
    async fn train(&self, request: &TrainRequest) -> Result<()>;
}

/// `yolo task=detect ...` command line engine
pub struct YoloCli {
    config: EngineConfig,
}

impl YoloCli {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Arguments of a validation invocation
    pub fn validate_args(&self, model: &Path, descriptor: &Path) -> Vec<String> {
        vec![
            "task=detect".to_string(),
            "mode=val".to_string(),
            format!("model={}", model.display()),
            format!("data={}", descriptor.display()),
            format!("iou={}", self.config.iou),
            format!("imgsz={}", self.config.imgsz),
            "verbose=False".to_string(),
        ]
    }

    /// Arguments of a training invocation
    pub fn train_args(&self, request: &TrainRequest) -> Vec<String> {
        vec![
            "task=detect".to_string(),
            "mode=train".to_string(),
            format!("model={}", request.base_model.display()),
            format!("data={}", request.descriptor.display()),
            format!("epochs={}", request.epochs),
            format!("lr0={}", request.lr0),
            format!("imgsz={}", self.config.imgsz),
            format!("project={}", request.project_dir.display()),
            format!("name={}", request.run_name),
            "exist_ok=True".to_string(),
        ]
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.config.program, args.join(" "))
    }
}

#[async_trait]
impl DetectionEngine for YoloCli {
    async fn validate(&self, model: &Path, descriptor: &Path) -> Result<String> {
        let args = self.validate_args(model, descriptor);
        let command = self.command_line(&args);
        info!(command = %command, "Running engine validation");

        let started = Instant::now();
        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| PipelineError::EngineSpawn {
                command: command.clone(),
                source,
            })?;
        PipelineMetrics::new().observe_engine_duration("val", started.elapsed().as_secs_f64());

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(PipelineError::EngineFailed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }
        if self.config.fail_on_stderr && !stderr.is_empty() {
            return Err(PipelineError::EngineStderr { command, stderr });
        }

        debug!(bytes = stdout.len(), "Captured validation report");
        Ok(stdout)
    }

    async fn train(&self, request: &TrainRequest) -> Result<()> {
        let args = self.train_args(request);
        let command = self.command_line(&args);
        info!(command = %command, "Running engine training");

        // Inherited stdio: progress is shown live, nothing is buffered
        let started = Instant::now();
        let status = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| PipelineError::EngineSpawn {
                command: command.clone(),
                source,
            })?;
        PipelineMetrics::new().observe_engine_duration("train", started.elapsed().as_secs_f64());

        if !status.success() {
            return Err(PipelineError::EngineFailed {
                command,
                status: status.to_string(),
                stderr: "see streamed training output".to_string(),
            });
        }

        Ok(())
    }
}

/// Extract mAP50 from a validation report
///
/// Tries the aggregate table row first, then the `mAP50(B): x` summary form.
/// Returns `None` on format drift instead of guessing.
pub fn parse_map50(report: &str) -> Option<f64> {
    parse_aggregate_row(report).or_else(|| parse_summary_key(report))
}

fn parse_aggregate_row(report: &str) -> Option<f64> {
    report.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&AGGREGATE_ROW_MARKER) {
            return None;
        }
        tokens
            .get(AGGREGATE_MAP50_COLUMN)
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|v| is_valid_map(*v))
    })
}

fn parse_summary_key(report: &str) -> Option<f64> {
    report.lines().find_map(|line| {
        let idx = line.find(SUMMARY_MAP50_KEY)?;
        line[idx + SUMMARY_MAP50_KEY.len()..]
            .split_whitespace()
            .next()
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|v| is_valid_map(*v))
    })
}

fn is_valid_map(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}
