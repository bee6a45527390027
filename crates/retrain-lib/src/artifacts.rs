//! Versioned model artifact store
//!
//! The deployed model lives at a fixed path. Candidates are keyed by run id
//! (`<candidates_dir>/<run_id>/weights/best.pt`) so overlapping runs never
//! overwrite each other's output. The deployed file is only ever replaced
//! by [`ArtifactStore::promote`], which swaps it atomically.

use crate::error::{PipelineError, Result};
use crate::fsutil::{copy_atomic, file_checksum};
use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// Identifier of one pipeline run, sortable by creation time
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(String);

impl RunId {
    /// `YYYYMMDDTHHMMSSZ-xxxx` from the current UTC time and a random suffix
    pub fn generate() -> Self {
        let suffix: u16 = rand::random();
        Self(format!("{}-{suffix:04x}", Utc::now().format("%Y%m%dT%H%M%SZ")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Weights produced by one fine-tune run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateArtifact {
    pub run_id: RunId,
    pub weights: PathBuf,
}

impl CandidateArtifact {
    pub fn exists(&self) -> bool {
        self.weights.is_file()
    }
}

/// Deployed and candidate model locations
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    deployed: PathBuf,
    candidates_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(deployed: impl Into<PathBuf>, candidates_dir: impl Into<PathBuf>) -> Self {
        Self {
            deployed: deployed.into(),
            candidates_dir: candidates_dir.into(),
        }
    }

    pub fn deployed_path(&self) -> &Path {
        &self.deployed
    }

    pub fn candidates_dir(&self) -> &Path {
        &self.candidates_dir
    }

    /// Deployed model path, failing if nothing is deployed
    pub fn require_deployed(&self) -> Result<&Path> {
        if self.deployed.is_file() {
            Ok(&self.deployed)
        } else {
            Err(PipelineError::DeployedModelMissing(self.deployed.clone()))
        }
    }

    /// Where the candidate of `run_id` is (or will be) written
    pub fn candidate_for(&self, run_id: &RunId) -> CandidateArtifact {
        CandidateArtifact {
            run_id: run_id.clone(),
            weights: self
                .candidates_dir
                .join(run_id.as_str())
                .join("weights")
                .join("best.pt"),
        }
    }

    /// All candidates with weights on disk, newest first
    pub fn candidates(&self) -> Result<Vec<CandidateArtifact>> {
        let entries = match fs::read_dir(&self.candidates_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::io(&self.candidates_dir, e)),
        };

        let mut found: Vec<(SystemTime, CandidateArtifact)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| {
                let run_id = RunId(e.file_name().to_string_lossy().into_owned());
                let candidate = self.candidate_for(&run_id);
                let modified = fs::metadata(&candidate.weights)
                    .and_then(|m| m.modified())
                    .ok()?;
                Some((modified, candidate))
            })
            .collect();

        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.run_id.cmp(&a.1.run_id)));
        Ok(found.into_iter().map(|(_, c)| c).collect())
    }

    /// Most recently trained candidate
    pub fn latest_candidate(&self) -> Result<Option<CandidateArtifact>> {
        Ok(self.candidates()?.into_iter().next())
    }

    /// Replace the deployed model with `candidate`
    ///
    /// The copy goes to a temp file that is renamed over the deployed path,
    /// so the deployed model is never observed half-written. Returns the
    /// SHA256 of the new deployed model after checking it matches the candidate.
    pub fn promote(&self, candidate: &CandidateArtifact) -> Result<String> {
        let candidate_checksum = file_checksum(&candidate.weights)?;
        let previous_checksum = file_checksum(&self.deployed).ok();

        let bytes = copy_atomic(&candidate.weights, &self.deployed)?;

        let deployed_checksum = file_checksum(&self.deployed)?;
        if deployed_checksum != candidate_checksum {
            return Err(PipelineError::Io {
                path: self.deployed.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "checksum mismatch after promotion: expected {candidate_checksum}, got {deployed_checksum}"
                    ),
                ),
            });
        }

        info!(
            run_id = %candidate.run_id,
            deployed = %self.deployed.display(),
            size = bytes,
            previous_checksum = ?previous_checksum,
            checksum = %deployed_checksum,
            "Deployed model replaced"
        );

        Ok(deployed_checksum)
    }

    /// Delete all but the newest `keep` candidates, returning how many run
    /// directories were removed
    ///
    /// Run directories without weights (failed or interrupted trainings) are
    /// removed as well.
    pub fn prune(&self, keep: usize) -> usize {
        let kept: HashSet<String> = match self.candidates() {
            Ok(c) => c
                .into_iter()
                .take(keep)
                .map(|c| c.run_id.as_str().to_string())
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to list candidates for pruning");
                return 0;
            }
        };

        let entries = match fs::read_dir(&self.candidates_dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_dir || kept.contains(&name) {
                continue;
            }
            let run_dir = entry.path();
            match fs::remove_dir_all(&run_dir) {
                Ok(()) => removed += 1,
                Err(e) => warn!(
                    path = %run_dir.display(),
                    error = %e,
                    "Failed to remove old candidate"
                ),
            }
        }
        removed
    }
}
