//! Exclusive run lock over the on-disk pipeline state
//!
//! The lock is an OS advisory lock on `paths.lock_file`, so it dies with
//! the holding process. The file is left in place between runs; unlinking
//! it would let a second opener lock a stale inode.

use crate::error::{PipelineError, Result};
use crate::fsutil::ensure_parent;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Held for the duration of a run; unlocks on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Lock `path`, failing with `Locked` if a live process holds it
    ///
    /// A lock file left behind by a killed run is not held by anyone and
    /// is simply taken over.
    pub fn acquire(path: &Path) -> Result<Self> {
        ensure_parent(path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| PipelineError::io(path, e))?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            let contended = e.kind() == std::io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            return Err(if contended {
                PipelineError::Locked(path.to_path_buf())
            } else {
                PipelineError::io(path, e)
            });
        }

        write_pid(&mut file).map_err(|e| PipelineError::io(path, e))?;
        debug!(lock = %path.display(), "Run lock acquired");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "pid={}", std::process::id())
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}
