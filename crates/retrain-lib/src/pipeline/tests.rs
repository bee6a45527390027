//! End-to-end pipeline scenarios against a scripted engine

use super::*;
use crate::engine::TrainRequest;
use crate::error::PipelineError;
use chrono::{Duration, Utc};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const CANDIDATE_BYTES: &[u8] = b"fine-tuned weights";
const DEPLOYED_BYTES: &[u8] = b"deployed weights";

/// Scores the deployed model and any candidate with fixed values
struct ScriptedEngine {
    deployed: PathBuf,
    deployed_score: f64,
    candidate_score: f64,
    fail_training: bool,
    trainings: AtomicUsize,
}

impl ScriptedEngine {
    fn new(deployed: &Path, deployed_score: f64, candidate_score: f64) -> Self {
        Self {
            deployed: deployed.to_path_buf(),
            deployed_score,
            candidate_score,
            fail_training: false,
            trainings: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DetectionEngine for ScriptedEngine {
    async fn validate(&self, model: &Path, _descriptor: &Path) -> Result<String> {
        let score = if model == self.deployed {
            self.deployed_score
        } else {
            self.candidate_score
        };
        Ok(format!(
            "                 Class     Images  Instances      Box(P          R      mAP50  mAP50-95)\n\
                               all         12         30      0.700      0.600      {score:.3}      0.400\n"
        ))
    }

    async fn train(&self, request: &TrainRequest) -> Result<()> {
        self.trainings.fetch_add(1, Ordering::SeqCst);
        if self.fail_training {
            return Err(PipelineError::EngineFailed {
                command: "yolo task=detect mode=train".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "CUDA out of memory".to_string(),
            });
        }
        let weights = request.output_weights();
        fs::create_dir_all(weights.parent().unwrap()).unwrap();
        fs::write(weights, CANDIDATE_BYTES).unwrap();
        Ok(())
    }
}

struct Workspace {
    temp_dir: TempDir,
    config: PipelineConfig,
    dataset: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = PipelineConfig::default();
        config.paths = config.paths.rooted_at(temp_dir.path());
        config.finetune.seed = Some(42);

        let deployed = &config.paths.deployed_model;
        fs::create_dir_all(deployed.parent().unwrap()).unwrap();
        fs::write(deployed, DEPLOYED_BYTES).unwrap();

        let dataset = temp_dir.path().join("datasets/batch_01");
        fs::create_dir_all(dataset.join("images")).unwrap();
        fs::create_dir_all(dataset.join("labels")).unwrap();
        fs::write(dataset.join("images/part_001.jpg"), b"jpg").unwrap();
        fs::write(dataset.join("labels/part_001.txt"), b"0 0.5 0.5 0.2 0.2").unwrap();

        Self {
            temp_dir,
            config,
            dataset,
        }
    }

    fn deployed(&self) -> &Path {
        &self.config.paths.deployed_model
    }

    fn pipeline(&self, engine: Arc<ScriptedEngine>) -> Pipeline {
        Pipeline::new(&self.config, engine)
    }

    fn source(&self) -> DatasetSource {
        DatasetSource::Manual {
            root: self.dataset.clone(),
        }
    }
}

#[tokio::test]
async fn test_low_metric_on_empty_history_promotes_when_confirmed() {
    let ws = Workspace::new();
    let engine = Arc::new(ScriptedEngine::new(ws.deployed(), 0.55, 0.63));
    let pipeline = ws.pipeline(engine.clone());

    let report = pipeline
        .run(&ws.source(), &FixedConfirmation(true))
        .await
        .unwrap();

    assert_eq!(report.final_stage, PipelineStage::Done);
    assert_eq!(report.metric, 0.55);
    assert_eq!(report.previous_metric, None);
    assert!(!report.decision.recommended);
    assert!(report.decision.reason.contains("baseline"));
    assert!(report.confirmed);
    assert!(report.promoted());
    assert_eq!(engine.trainings.load(Ordering::SeqCst), 1);

    assert_eq!(fs::read(ws.deployed()).unwrap(), CANDIDATE_BYTES);
    let records = pipeline.history().records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metric, 0.55);
    assert_eq!(
        pipeline.history().last_dataset_used().unwrap(),
        Some(fs::canonicalize(&ws.dataset).unwrap())
    );
    assert!(RunLock::acquire(&ws.config.paths.lock_file).is_ok());
}

#[tokio::test]
async fn test_below_threshold_is_recommended_and_followed() {
    let ws = Workspace::new();
    let engine = Arc::new(ScriptedEngine::new(ws.deployed(), 0.55, 0.63));
    let pipeline = ws.pipeline(engine.clone());
    pipeline
        .history()
        .append_at(0.58, Utc::now() - Duration::hours(1))
        .unwrap();

    let report = pipeline
        .run(&ws.source(), &FollowRecommendation)
        .await
        .unwrap();

    assert!(report.decision.recommended);
    assert!(report.decision.reason.contains("below absolute threshold"));
    assert!(report.promoted());
    let merge = report.merge.unwrap();
    assert_eq!(merge.new_pairs_added, 1);
    assert_eq!(pipeline.history().records().unwrap().len(), 2);
}

#[tokio::test]
async fn test_stable_metric_is_not_recommended() {
    let ws = Workspace::new();
    let engine = Arc::new(ScriptedEngine::new(ws.deployed(), 0.69, 0.80));
    let pipeline = ws.pipeline(engine.clone());
    pipeline
        .history()
        .append_at(0.70, Utc::now() - Duration::hours(1))
        .unwrap();

    let report = pipeline
        .run(&ws.source(), &FollowRecommendation)
        .await
        .unwrap();

    assert_eq!(report.previous_metric, Some(0.70));
    assert!(!report.decision.recommended);
    assert_eq!(report.decision.reason, "performance stable");
    assert!(!report.confirmed);
    assert!(report.promotion.is_none());
    assert_eq!(engine.trainings.load(Ordering::SeqCst), 0);
    assert_eq!(fs::read(ws.deployed()).unwrap(), DEPLOYED_BYTES);

    let metrics: Vec<f64> = pipeline
        .history()
        .records()
        .unwrap()
        .into_iter()
        .map(|r| r.metric)
        .collect();
    assert_eq!(metrics, vec![0.70, 0.69]);
}

#[tokio::test]
async fn test_declined_recommendation_still_records_history() {
    let ws = Workspace::new();
    let engine = Arc::new(ScriptedEngine::new(ws.deployed(), 0.40, 0.80));
    let pipeline = ws.pipeline(engine.clone());
    pipeline
        .history()
        .append_at(0.70, Utc::now() - Duration::hours(1))
        .unwrap();

    let report = pipeline
        .run(&ws.source(), &FixedConfirmation(false))
        .await
        .unwrap();

    assert!(report.decision.recommended);
    assert!(!report.confirmed);
    assert_eq!(pipeline.history().last_metric().unwrap(), Some(0.40));
    assert_eq!(engine.trainings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_marginal_candidate_is_not_promoted() {
    let ws = Workspace::new();
    let engine = Arc::new(ScriptedEngine::new(ws.deployed(), 0.55, 0.56));
    let pipeline = ws.pipeline(engine);

    let report = pipeline
        .run(&ws.source(), &FixedConfirmation(true))
        .await
        .unwrap();

    let promotion = report.promotion.unwrap();
    assert!(promotion.was_compared());
    assert!(!promotion.promoted);
    assert_eq!(fs::read(ws.deployed()).unwrap(), DEPLOYED_BYTES);
}

#[tokio::test]
async fn test_training_failure_keeps_persisted_state() {
    let ws = Workspace::new();
    let mut engine = ScriptedEngine::new(ws.deployed(), 0.50, 0.90);
    engine.fail_training = true;
    let pipeline = ws.pipeline(Arc::new(engine));

    let err = pipeline
        .run(&ws.source(), &FixedConfirmation(true))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(PipelineStage::FineTune));
    assert!(err.to_string().contains("CUDA out of memory"));
    assert_eq!(fs::read(ws.deployed()).unwrap(), DEPLOYED_BYTES);
    assert_eq!(pipeline.history().last_metric().unwrap(), Some(0.50));
    assert!(pipeline.history().last_dataset_used().unwrap().is_some());
    assert!(RunLock::acquire(&ws.config.paths.lock_file).is_ok());
}

#[tokio::test]
async fn test_missing_deployed_model_aborts_before_history() {
    let ws = Workspace::new();
    fs::remove_file(ws.deployed()).unwrap();
    let pipeline = ws.pipeline(Arc::new(ScriptedEngine::new(ws.deployed(), 0.5, 0.9)));

    let err = pipeline
        .run(&ws.source(), &FixedConfirmation(true))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(PipelineStage::Evaluate));
    assert!(err.is_configuration());
    assert!(pipeline.history().records().unwrap().is_empty());
    assert!(pipeline.history().last_dataset_used().unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_dataset_fails_in_select_step() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline(Arc::new(ScriptedEngine::new(ws.deployed(), 0.5, 0.9)));

    let err = pipeline
        .run(
            &DatasetSource::Manual {
                root: ws.temp_dir.path().join("no_such_dataset"),
            },
            &FixedConfirmation(true),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(PipelineStage::SelectDataset));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline(Arc::new(ScriptedEngine::new(ws.deployed(), 0.5, 0.9)));
    let _held = RunLock::acquire(&ws.config.paths.lock_file).unwrap();

    let err = pipeline
        .run(&ws.source(), &FixedConfirmation(true))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Locked(_)));
}

#[tokio::test]
async fn test_lock_file_from_killed_run_does_not_block() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline(Arc::new(ScriptedEngine::new(ws.deployed(), 0.5, 0.9)));
    let lock_file = &ws.config.paths.lock_file;
    fs::create_dir_all(lock_file.parent().unwrap()).unwrap();
    fs::write(lock_file, "pid=999999\n").unwrap();

    let report = pipeline
        .run(&ws.source(), &FixedConfirmation(false))
        .await
        .unwrap();

    assert_eq!(report.final_stage, PipelineStage::Done);
    assert_eq!(pipeline.history().records().unwrap().len(), 1);
}

#[tokio::test]
async fn test_promote_latest_without_candidate() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline(Arc::new(ScriptedEngine::new(ws.deployed(), 0.5, 0.9)));

    let outcome = pipeline.promote_latest(&ws.dataset).await.unwrap();
    assert!(!outcome.was_compared());
    assert_eq!(fs::read(ws.deployed()).unwrap(), DEPLOYED_BYTES);
}

#[tokio::test]
async fn test_standalone_fine_tune_then_promote() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline(Arc::new(ScriptedEngine::new(ws.deployed(), 0.50, 0.60)));

    let (merge, candidate) = pipeline.fine_tune(None, &ws.dataset).await.unwrap();
    assert_eq!(merge.new_pairs_added, 1);
    assert!(candidate.exists());

    let outcome = pipeline.promote_latest(&ws.dataset).await.unwrap();
    assert!(outcome.promoted);
    assert_eq!(fs::read(ws.deployed()).unwrap(), CANDIDATE_BYTES);
}

#[tokio::test]
async fn test_evaluate_can_record() {
    let ws = Workspace::new();
    let pipeline = ws.pipeline(Arc::new(ScriptedEngine::new(ws.deployed(), 0.66, 0.9)));

    let metric = pipeline.evaluate(&ws.dataset, None, false).await.unwrap();
    assert_eq!(metric, 0.66);
    assert!(pipeline.history().records().unwrap().is_empty());

    pipeline.evaluate(&ws.dataset, None, true).await.unwrap();
    assert_eq!(pipeline.history().last_metric().unwrap(), Some(0.66));
}
