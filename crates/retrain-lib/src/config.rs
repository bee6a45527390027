//! Pipeline configuration
//!
//! Loaded in layers: built-in defaults, an optional TOML file, then
//! `RETRAIN_`-prefixed environment variables (`__` separates sections,
//! e.g. `RETRAIN_POLICY__ABS_THRESHOLD=0.55`).

use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "retrain.toml";

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub policy: PolicyConfig,
    pub promotion: PromotionConfig,
    pub engine: EngineConfig,
    pub finetune: FineTuneConfig,
    pub dataset: DatasetConfig,
    pub export: ExportConfig,
}

/// On-disk locations of pipeline state and artifacts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub history_file: PathBuf,
    pub last_dataset_file: PathBuf,
    pub deployed_model: PathBuf,
    pub candidates_dir: PathBuf,
    pub finetune_pool: PathBuf,
    pub historical_pool: PathBuf,
    pub exports_root: PathBuf,
    pub lock_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            history_file: PathBuf::from("history/eval_history.csv"),
            last_dataset_file: PathBuf::from("history/last_eval_export.txt"),
            deployed_model: PathBuf::from("models/deployed/best.pt"),
            candidates_dir: PathBuf::from("models/candidates"),
            finetune_pool: PathBuf::from("finetune_dataset"),
            historical_pool: PathBuf::from("yolo_dataset_defect_detection"),
            exports_root: PathBuf::from("exports"),
            lock_file: PathBuf::from("history/.pipeline.lock"),
        }
    }
}

impl PathsConfig {
    /// Re-root every relative path under `base`
    pub fn rooted_at(&self, base: &Path) -> Self {
        let join = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                base.join(p)
            }
        };
        Self {
            history_file: join(&self.history_file),
            last_dataset_file: join(&self.last_dataset_file),
            deployed_model: join(&self.deployed_model),
            candidates_dir: join(&self.candidates_dir),
            finetune_pool: join(&self.finetune_pool),
            historical_pool: join(&self.historical_pool),
            exports_root: join(&self.exports_root),
            lock_file: join(&self.lock_file),
        }
    }
}

/// Retrain recommendation thresholds
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// mAP50 below this always recommends retraining
    pub abs_threshold: f64,
    /// Delta to the previous run below this recommends retraining (negative)
    pub drop_threshold: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            abs_threshold: 0.60,
            drop_threshold: -0.03,
        }
    }
}

/// Candidate promotion gate settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Candidate must beat deployed by strictly more than this
    pub improvement_margin: f64,
    /// Number of candidate runs kept on disk
    pub candidates_to_keep: usize,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            improvement_margin: 0.02,
            candidates_to_keep: 5,
        }
    }
}

/// External training/evaluation engine invocation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: String,
    pub iou: f64,
    pub imgsz: u32,
    pub epochs: u32,
    pub lr0: f64,
    /// Treat any stderr output of a validation run as a failure
    pub fail_on_stderr: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "yolo".to_string(),
            iou: 0.5,
            imgsz: 640,
            epochs: 3,
            lr0: 1e-4,
            fail_on_stderr: true,
        }
    }
}

/// Fine-tune pool construction
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FineTuneConfig {
    /// Upper bound of historical pairs mixed into each merge
    pub historical_sample_cap: usize,
    /// Fixed seed for reproducible historical sampling
    pub seed: Option<u64>,
}

impl Default for FineTuneConfig {
    fn default() -> Self {
        Self {
            historical_sample_cap: 50,
            seed: None,
        }
    }
}

/// Dataset layout and descriptor naming
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub class_names: Vec<String>,
    pub image_extensions: Vec<String>,
    pub image_subdir: String,
    pub label_subdir: String,
    pub eval_descriptor_name: String,
    pub finetune_descriptor_name: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            class_names: vec![
                "dentado".to_string(),
                "concave".to_string(),
                "perforation".to_string(),
            ],
            image_extensions: [".jpg", ".png", ".jpeg", ".JPG", ".PNG"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            image_subdir: "images".to_string(),
            label_subdir: "labels".to_string(),
            eval_descriptor_name: "data_eval.yaml".to_string(),
            finetune_descriptor_name: "data_finetune.yaml".to_string(),
        }
    }
}

/// Annotation tool export endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub url: String,
    pub project_id: u64,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            project_id: 1,
            api_token: None,
            timeout_secs: 300,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_source = match path {
            Some(p) => config::File::from(p.to_path_buf()).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix("RETRAIN")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("dataset.class_names")
                    .with_list_parse_key("dataset.image_extensions")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let config: PipelineConfig = settings
            .try_deserialize()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can operate with
    pub fn validate(&self) -> Result<()> {
        let finite = [
            ("policy.abs_threshold", self.policy.abs_threshold),
            ("policy.drop_threshold", self.policy.drop_threshold),
            ("promotion.improvement_margin", self.promotion.improvement_margin),
            ("engine.iou", self.engine.iou),
            ("engine.lr0", self.engine.lr0),
        ];
        for (key, value) in finite {
            if !value.is_finite() {
                return Err(PipelineError::Config(format!("{key} must be finite")));
            }
        }

        if self.promotion.improvement_margin < 0.0 {
            return Err(PipelineError::Config(
                "promotion.improvement_margin must not be negative".to_string(),
            ));
        }
        if self.engine.epochs == 0 {
            return Err(PipelineError::Config("engine.epochs must be > 0".to_string()));
        }
        if self.engine.program.trim().is_empty() {
            return Err(PipelineError::Config("engine.program is empty".to_string()));
        }
        if self.dataset.class_names.is_empty() {
            return Err(PipelineError::Config(
                "dataset.class_names must list at least one class".to_string(),
            ));
        }
        if self.dataset.image_extensions.is_empty() {
            return Err(PipelineError::Config(
                "dataset.image_extensions must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
