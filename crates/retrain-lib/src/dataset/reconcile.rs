//! Align an annotation export with its original images
//!
//! Exported label files are named `<token>-<original stem>.txt`. For each
//! label the original image is looked up by stem and copied into the
//! export's image folder under the label's own stem. Labels with no image
//! are deleted; that is an expected condition, logged per file.

use super::layout::{find_image, is_label_file};
use crate::config::DatasetConfig;
use crate::error::{PipelineError, Result};
use crate::models::ReconcileReport;
use std::fs;
use std::path::Path;
use tracing::{error, warn};

/// Original image stem for an exported label stem (`<token>-<name>` → `<name>`)
pub fn original_stem(label_stem: &str) -> &str {
    match label_stem.split_once('-') {
        Some((_, rest)) => rest,
        None => label_stem,
    }
}

/// Copy matched originals into `export_dir` and delete orphan labels
pub fn reconcile_export(
    export_dir: &Path,
    originals_dir: &Path,
    layout: &DatasetConfig,
) -> Result<ReconcileReport> {
    let labels_dir = export_dir.join(&layout.label_subdir);
    let images_dir = export_dir.join(&layout.image_subdir);

    if !labels_dir.is_dir() {
        return Err(PipelineError::InvalidDataset {
            root: export_dir.to_path_buf(),
            images: layout.image_subdir.clone(),
            labels: layout.label_subdir.clone(),
        });
    }
    if !originals_dir.is_dir() {
        return Err(PipelineError::OriginalImagesMissing(
            originals_dir.to_path_buf(),
        ));
    }
    fs::create_dir_all(&images_dir).map_err(|e| PipelineError::io(&images_dir, e))?;

    let mut labels: Vec<_> = fs::read_dir(&labels_dir)
        .map_err(|e| PipelineError::io(&labels_dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_label_file(p))
        .collect();
    labels.sort();

    let mut report = ReconcileReport::default();

    for label in labels {
        let Some(stem) = label.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        report.labels_checked += 1;

        match find_image(originals_dir, original_stem(stem), &layout.image_extensions) {
            Some(source) => {
                let ext = source
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_default();
                let dest = images_dir.join(format!("{stem}{ext}"));
                fs::copy(&source, &dest).map_err(|e| PipelineError::io(&dest, e))?;
                report.images_copied += 1;
            }
            None => match fs::remove_file(&label) {
                Ok(()) => {
                    warn!(
                        event = "orphan_label_deleted",
                        label = %label.display(),
                        "Deleted label with no matching image"
                    );
                    report.orphans_deleted += 1;
                }
                Err(e) => {
                    error!(
                        label = %label.display(),
                        error = %e,
                        "Failed to delete orphan label"
                    );
                }
            },
        }
    }

    Ok(report)
}
