//! `images/ + labels/` dataset layout helpers

use crate::config::DatasetConfig;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Class list file some exporters drop next to the labels
pub const CLASSES_FILE: &str = "classes.txt";

/// An image with its ground-truth label file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePair {
    pub image: PathBuf,
    pub label: PathBuf,
}

impl SamplePair {
    /// File name the image keeps inside a flat pool
    pub fn image_name(&self) -> Option<&std::ffi::OsStr> {
        self.image.file_name()
    }

    pub fn label_name(&self) -> Option<&std::ffi::OsStr> {
        self.label.file_name()
    }
}

/// True for `*.txt` annotation files other than the class list
pub fn is_label_file(path: &Path) -> bool {
    let is_txt = path.extension().map(|e| e == "txt").unwrap_or(false);
    let is_classes = path
        .file_name()
        .map(|n| n == CLASSES_FILE)
        .unwrap_or(false);
    is_txt && !is_classes
}

/// First existing `dir/stem<ext>` over the recognised extensions
pub fn find_image(dir: &Path, stem: &str, extensions: &[String]) -> Option<PathBuf> {
    extensions
        .iter()
        .map(|ext| dir.join(format!("{stem}{ext}")))
        .find(|candidate| candidate.is_file())
}

/// All (image, label) pairs under `root`, walking nested splits such as
/// `labels/train` against `images/train`
///
/// Labels without an image are left out. Output is sorted by label path.
pub fn list_pairs(root: &Path, layout: &DatasetConfig) -> Vec<SamplePair> {
    let images_dir = root.join(&layout.image_subdir);
    let labels_dir = root.join(&layout.label_subdir);

    if !labels_dir.is_dir() {
        tracing::debug!(labels_dir = %labels_dir.display(), "Labels directory not found");
        return Vec::new();
    }

    let mut pairs: Vec<SamplePair> = WalkDir::new(&labels_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_label_file(e.path()))
        .filter_map(|entry| {
            let label = entry.path().to_path_buf();
            let stem = label.file_stem()?.to_str()?.to_string();
            let rel_dir = label.parent()?.strip_prefix(&labels_dir).ok()?;
            let image = find_image(&images_dir.join(rel_dir), &stem, &layout.image_extensions)?;
            Some(SamplePair { image, label })
        })
        .collect();

    pairs.sort_by(|a, b| a.label.cmp(&b.label));
    tracing::debug!(root = %root.display(), pairs = pairs.len(), "Listed image/label pairs");
    pairs
}
