//! Model evaluation through the external engine

use crate::engine::{parse_map50, DetectionEngine};
use crate::error::{PipelineError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Turns an engine validation run into a single mAP50 value
#[derive(Clone)]
pub struct Evaluator {
    engine: Arc<dyn DetectionEngine>,
}

impl Evaluator {
    pub fn new(engine: Arc<dyn DetectionEngine>) -> Self {
        Self { engine }
    }

    /// Evaluate `model` on the dataset described by `descriptor`
    ///
    /// No retry: an engine failure or an unparsable report fails the call.
    pub async fn evaluate(&self, model: &Path, descriptor: &Path) -> Result<f64> {
        if !descriptor.is_file() {
            return Err(PipelineError::Descriptor {
                path: descriptor.to_path_buf(),
                message: "descriptor file not found".to_string(),
            });
        }

        info!(
            model = %model.display(),
            descriptor = %descriptor.display(),
            "Evaluating model"
        );

        let report = self.engine.validate(model, descriptor).await?;
        let map50 = parse_map50(&report).ok_or_else(|| {
            debug!(report = %report, "Validation report without mAP50");
            PipelineError::MetricNotFound {
                model: model.to_path_buf(),
            }
        })?;

        info!(model = %model.display(), map50 = map50, "Evaluation finished");
        Ok(map50)
    }
}
