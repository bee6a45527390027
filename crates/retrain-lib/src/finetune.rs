//! Fine-tune pool construction and candidate training
//!
//! The pool is additive across runs: each merge copies the newly verified
//! pairs plus a bounded random sample of the historical dataset into it,
//! skipping files already present. Training then starts from the deployed
//! weights and writes a run-keyed candidate.

use crate::artifacts::{ArtifactStore, CandidateArtifact, RunId};
use crate::config::{DatasetConfig, EngineConfig, FineTuneConfig};
use crate::dataset::{list_pairs, DatasetDescriptor, SamplePair};
use crate::engine::{DetectionEngine, TrainRequest};
use crate::error::{PipelineError, Result};
use crate::models::MergeReport;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds the training pool and runs the engine in training mode
pub struct FineTuner {
    engine: Arc<dyn DetectionEngine>,
    artifacts: ArtifactStore,
    layout: DatasetConfig,
    pool_dir: PathBuf,
    historical_pool: PathBuf,
    settings: FineTuneConfig,
    epochs: u32,
    lr0: f64,
}

impl FineTuner {
    pub fn new(
        engine: Arc<dyn DetectionEngine>,
        artifacts: ArtifactStore,
        layout: DatasetConfig,
        pool_dir: impl Into<PathBuf>,
        historical_pool: impl Into<PathBuf>,
        settings: FineTuneConfig,
        engine_config: &EngineConfig,
    ) -> Self {
        Self {
            engine,
            artifacts,
            layout,
            pool_dir: pool_dir.into(),
            historical_pool: historical_pool.into(),
            settings,
            epochs: engine_config.epochs,
            lr0: engine_config.lr0,
        }
    }

    pub fn pool_dir(&self) -> &Path {
        &self.pool_dir
    }

    /// Descriptor file of the merged pool
    pub fn descriptor_path(&self) -> PathBuf {
        self.pool_dir.join(&self.layout.finetune_descriptor_name)
    }

    /// Merge new and sampled historical pairs into the pool and describe it
    ///
    /// `previous` is the dataset the prior run evaluated on; its pairs are
    /// merged too when it still exists. Without it, `current` alone seeds
    /// the pool.
    pub fn merge_pool(&self, previous: Option<&Path>, current: &Path) -> Result<MergeReport> {
        let out_images = self.pool_dir.join(&self.layout.image_subdir);
        let out_labels = self.pool_dir.join(&self.layout.label_subdir);
        fs::create_dir_all(&out_images).map_err(|e| PipelineError::io(&out_images, e))?;
        fs::create_dir_all(&out_labels).map_err(|e| PipelineError::io(&out_labels, e))?;

        let mut new_pairs = Vec::new();
        if let Some(prev) = previous.filter(|p| *p != current) {
            if prev.is_dir() {
                info!(previous = %prev.display(), "Including previously evaluated dataset");
                new_pairs.extend(list_pairs(prev, &self.layout));
            } else {
                debug!(previous = %prev.display(), "Previous dataset no longer exists");
            }
        }
        info!(current = %current.display(), "Collecting new data");
        new_pairs.extend(list_pairs(current, &self.layout));

        let historical = self.sample_historical();

        let new_pairs_added = copy_pairs(&new_pairs, &out_images, &out_labels)?;
        let historical_pairs_added = copy_pairs(&historical, &out_images, &out_labels)?;

        let pool_size = fs::read_dir(&out_images)
            .map_err(|e| PipelineError::io(&out_images, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .count();

        let descriptor = DatasetDescriptor::for_root(&self.pool_dir, &self.layout)?;
        descriptor.write(&self.descriptor_path())?;

        let report = MergeReport {
            new_pairs_found: new_pairs.len(),
            new_pairs_added,
            historical_pairs_sampled: historical.len(),
            historical_pairs_added,
            pool_size,
        };
        info!(
            new_pairs_added = report.new_pairs_added,
            historical_pairs_added = report.historical_pairs_added,
            pool_size = report.pool_size,
            "Fine-tune pool merged"
        );
        Ok(report)
    }

    /// Up to `historical_sample_cap` random pairs from the historical dataset
    fn sample_historical(&self) -> Vec<SamplePair> {
        let mut pairs = list_pairs(&self.historical_pool, &self.layout);
        let mut rng = match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        pairs.shuffle(&mut rng);
        pairs.truncate(self.settings.historical_sample_cap);
        pairs
    }

    /// Train a candidate for `run_id` starting from the deployed weights
    pub async fn train(&self, run_id: &RunId) -> Result<CandidateArtifact> {
        let base_model = self.artifacts.require_deployed()?.to_path_buf();

        let project_dir = self.artifacts.candidates_dir();
        fs::create_dir_all(project_dir).map_err(|e| PipelineError::io(project_dir, e))?;
        let project_dir = fs::canonicalize(project_dir).map_err(|e| PipelineError::io(project_dir, e))?;

        let request = TrainRequest {
            base_model,
            descriptor: self.descriptor_path(),
            project_dir,
            run_name: run_id.to_string(),
            epochs: self.epochs,
            lr0: self.lr0,
        };

        info!(
            run_id = %run_id,
            epochs = request.epochs,
            lr0 = request.lr0,
            "Starting fine-tune training"
        );
        self.engine.train(&request).await?;

        let candidate = self.artifacts.candidate_for(run_id);
        if !candidate.exists() {
            return Err(PipelineError::CandidateMissing(candidate.weights));
        }
        Ok(candidate)
    }

    /// Merge the pool, then train a candidate
    pub async fn fine_tune(
        &self,
        previous: Option<&Path>,
        current: &Path,
        run_id: &RunId,
    ) -> Result<(MergeReport, CandidateArtifact)> {
        self.artifacts.require_deployed()?;
        let report = self.merge_pool(previous, current)?;
        let candidate = self.train(run_id).await?;
        Ok((report, candidate))
    }
}

/// Copy pairs into a flat pool, skipping pairs already present
///
/// The label is copied before the image, so a present image always has
/// its label next to it. A label left behind by an interrupted copy is
/// reused only when its bytes match; a different label with the same stem
/// belongs to another image and the pair is skipped.
fn copy_pairs(pairs: &[SamplePair], out_images: &Path, out_labels: &Path) -> Result<usize> {
    let mut copied = 0;
    for pair in pairs {
        let (Some(image_name), Some(label_name)) = (pair.image_name(), pair.label_name()) else {
            continue;
        };
        let dest_image = out_images.join(image_name);
        if dest_image.exists() {
            continue;
        }
        let dest_label = out_labels.join(label_name);
        if dest_label.exists() {
            if !same_contents(&pair.label, &dest_label)? {
                warn!(
                    image = %pair.image.display(),
                    pool_label = %dest_label.display(),
                    "Pool already has a different label with this name, skipping pair"
                );
                continue;
            }
        } else {
            fs::copy(&pair.label, &dest_label).map_err(|e| PipelineError::io(&dest_label, e))?;
        }
        fs::copy(&pair.image, &dest_image).map_err(|e| PipelineError::io(&dest_image, e))?;
        copied += 1;
    }
    Ok(copied)
}

fn same_contents(a: &Path, b: &Path) -> Result<bool> {
    let left = fs::read(a).map_err(|e| PipelineError::io(a, e))?;
    let right = fs::read(b).map_err(|e| PipelineError::io(b, e))?;
    Ok(left == right)
}
