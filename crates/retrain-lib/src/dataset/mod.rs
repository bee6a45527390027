//! Dataset preparation
//!
//! This module provides:
//! - dataset descriptor generation and validation
//! - annotation tool export download
//! - alignment of exports with original images (orphan label cleanup)
//! - the auto/manual preparer the pipeline starts from

mod descriptor;
mod export;
mod layout;
mod reconcile;

pub use descriptor::DatasetDescriptor;
pub use export::{extract_archive, latest_export_dir, AnnotationExporter, LabelStudioExporter};
pub use layout::{find_image, is_label_file, list_pairs, SamplePair, CLASSES_FILE};
pub use reconcile::{original_stem, reconcile_export};

use crate::config::DatasetConfig;
use crate::error::{PipelineError, Result};
use crate::models::ReconcileReport;
use crate::observability::{PipelineLogger, PipelineMetrics};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Where this run's evaluation dataset comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// Fresh export from the annotation tool, aligned against original images
    Auto { originals_dir: PathBuf },
    /// Existing folder already in `images/ + labels/` layout
    Manual { root: PathBuf },
}

/// A dataset ready for evaluation
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub root: PathBuf,
    pub descriptor_path: PathBuf,
    pub descriptor: DatasetDescriptor,
    /// Present for auto exports
    pub reconcile: Option<ReconcileReport>,
}

/// Produces dataset descriptors for either source
pub struct DatasetPreparer {
    layout: DatasetConfig,
    exports_root: PathBuf,
    exporter: Option<Arc<dyn AnnotationExporter>>,
}

impl DatasetPreparer {
    pub fn new(layout: DatasetConfig, exports_root: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            exports_root: exports_root.into(),
            exporter: None,
        }
    }

    /// Enable auto mode with the given exporter
    pub fn with_exporter(mut self, exporter: Arc<dyn AnnotationExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn layout(&self) -> &DatasetConfig {
        &self.layout
    }

    pub async fn prepare(
        &self,
        source: &DatasetSource,
        logger: &PipelineLogger,
    ) -> Result<PreparedDataset> {
        match source {
            DatasetSource::Auto { originals_dir } => self.prepare_auto(originals_dir, logger).await,
            DatasetSource::Manual { root } => self.prepare_manual(root),
        }
    }

    async fn prepare_auto(
        &self,
        originals_dir: &Path,
        logger: &PipelineLogger,
    ) -> Result<PreparedDataset> {
        let exporter = self.exporter.as_ref().ok_or_else(|| {
            PipelineError::Config("auto export requested but no exporter is configured".to_string())
        })?;
        if !originals_dir.is_dir() {
            return Err(PipelineError::OriginalImagesMissing(
                originals_dir.to_path_buf(),
            ));
        }

        info!(exports_root = %self.exports_root.display(), "Starting auto export");
        let exported = exporter.export(&self.exports_root).await?;

        let export_dir = latest_export_dir(&self.exports_root)?;
        if !same_dir(&exported, &export_dir) {
            warn!(
                exported = %exported.display(),
                latest = %export_dir.display(),
                "Newest export folder is not the one just written; check folder timestamps"
            );
        }
        info!(export_dir = %export_dir.display(), "Using latest export");

        let report = reconcile_export(&export_dir, originals_dir, &self.layout)?;
        logger.log_reconcile(&export_dir, &report);
        PipelineMetrics::new().add_orphan_labels(report.orphans_deleted);

        let mut prepared = self.describe(&export_dir)?;
        prepared.reconcile = Some(report);
        Ok(prepared)
    }

    fn prepare_manual(&self, root: &Path) -> Result<PreparedDataset> {
        info!(root = %root.display(), "Using existing dataset folder");
        self.describe(root)
    }

    /// Validate `root` and write its evaluation descriptor next to it
    pub fn describe(&self, root: &Path) -> Result<PreparedDataset> {
        let descriptor = DatasetDescriptor::for_root(root, &self.layout)?;
        let descriptor_path = descriptor.root.join(&self.layout.eval_descriptor_name);
        descriptor.write(&descriptor_path)?;

        Ok(PreparedDataset {
            root: descriptor.root.clone(),
            descriptor_path,
            descriptor,
            reconcile: None,
        })
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
