//! Small filesystem helpers shared by the stores

use crate::error::{PipelineError, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

/// Create the parent directory of `path` if it has one
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
    }
    Ok(())
}

/// Replace `path` with `bytes` via a synced temp file and a rename
///
/// Readers observe either the old or the new content, never a mix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let temp_path = temp_sibling(path);

    let mut file = File::create(&temp_path).map_err(|e| PipelineError::io(&temp_path, e))?;
    file.write_all(bytes)
        .map_err(|e| PipelineError::io(&temp_path, e))?;
    file.sync_all()
        .map_err(|e| PipelineError::io(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        PipelineError::io(path, e)
    })
}

/// Copy `src` over `dst` with the same temp-then-rename guarantee as [`write_atomic`]
pub fn copy_atomic(src: &Path, dst: &Path) -> Result<u64> {
    ensure_parent(dst)?;
    let temp_path = temp_sibling(dst);

    let copied = (|| -> io::Result<u64> {
        let mut reader = File::open(src)?;
        let mut writer = File::create(&temp_path)?;
        let copied = io::copy(&mut reader, &mut writer)?;
        writer.sync_all()?;
        Ok(copied)
    })();

    let copied = match copied {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(PipelineError::io(src, e));
        }
    };

    fs::rename(&temp_path, dst).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        PipelineError::io(dst, e)
    })?;

    Ok(copied)
}

/// SHA256 of a file's content as lowercase hex
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| PipelineError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn temp_sibling(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
