//! Dataset descriptor file (`path`, `train`, `val`, `nc`, `names`)

use crate::config::DatasetConfig;
use crate::error::{PipelineError, Result};
use crate::fsutil::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Validated description of an `images/ + labels/` dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDescriptor {
    pub root: PathBuf,
    pub image_subdir: String,
    pub label_subdir: String,
    pub class_names: Vec<String>,
}

/// On-disk shape read by the engine
#[derive(Debug, Serialize, Deserialize)]
struct DescriptorFile {
    path: String,
    train: String,
    val: String,
    nc: usize,
    names: Vec<String>,
}

impl DatasetDescriptor {
    /// Describe `root`, which must contain both layout subfolders
    pub fn for_root(root: &Path, layout: &DatasetConfig) -> Result<Self> {
        let invalid = || PipelineError::InvalidDataset {
            root: root.to_path_buf(),
            images: layout.image_subdir.clone(),
            labels: layout.label_subdir.clone(),
        };

        if !root.join(&layout.image_subdir).is_dir() || !root.join(&layout.label_subdir).is_dir() {
            return Err(invalid());
        }

        let root = fs::canonicalize(root).map_err(|e| PipelineError::io(root, e))?;

        Ok(Self {
            root,
            image_subdir: layout.image_subdir.clone(),
            label_subdir: layout.label_subdir.clone(),
            class_names: layout.class_names.clone(),
        })
    }

    pub fn class_count(&self) -> usize {
        self.class_names.len()
    }

    /// Serialise as YAML; train and val both point at the image folder
    pub fn to_yaml(&self) -> Result<String> {
        let file = DescriptorFile {
            path: self.root.to_string_lossy().replace('\\', "/"),
            train: self.image_subdir.clone(),
            val: self.image_subdir.clone(),
            nc: self.class_count(),
            names: self.class_names.clone(),
        };
        serde_yaml::to_string(&file).map_err(|e| PipelineError::Descriptor {
            path: self.root.clone(),
            message: e.to_string(),
        })
    }

    /// Write the descriptor to `path`
    pub fn write(&self, path: &Path) -> Result<()> {
        let yaml = self.to_yaml()?;
        write_atomic(path, yaml.as_bytes())?;
        info!(
            path = %path.display(),
            root = %self.root.display(),
            classes = self.class_count(),
            "Wrote dataset descriptor"
        );
        Ok(())
    }

    /// Read a descriptor back, checking `nc` against `names`
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let file: DescriptorFile =
            serde_yaml::from_str(&content).map_err(|e| PipelineError::Descriptor {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if file.nc != file.names.len() {
            return Err(PipelineError::Descriptor {
                path: path.to_path_buf(),
                message: format!("nc is {} but {} names are listed", file.nc, file.names.len()),
            });
        }

        Ok(Self {
            root: PathBuf::from(file.path),
            image_subdir: file.train,
            label_subdir: DatasetConfig::default().label_subdir,
            class_names: file.names,
        })
    }
}
