//! Annotation tool export client

use crate::config::ExportConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use url::Url;

/// Source of freshly annotated datasets
#[async_trait]
pub trait AnnotationExporter: Send + Sync {
    /// Export the current annotations into a new directory under `exports_root`
    async fn export(&self, exports_root: &Path) -> Result<PathBuf>;
}

/// Label Studio project export (`exportType=YOLO`)
pub struct LabelStudioExporter {
    client: Client,
    base_url: Url,
    project_id: u64,
    api_token: String,
}

impl LabelStudioExporter {
    pub fn new(config: &ExportConfig) -> Result<Self> {
        let api_token = config
            .api_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::Config("export.api_token is required for auto export".to_string())
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {e}")))?;

        let base_url = Url::parse(&config.url)
            .map_err(|e| PipelineError::Config(format!("invalid export.url {}: {e}", config.url)))?;

        Ok(Self {
            client,
            base_url,
            project_id: config.project_id,
            api_token,
        })
    }

    /// Export endpoint for the configured project
    pub fn export_url(&self) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("api/projects/{}/export", self.project_id))
            .map_err(|e| PipelineError::Config(format!("invalid export path: {e}")))?;
        url.query_pairs_mut().append_pair("exportType", "YOLO");
        Ok(url)
    }
}

#[async_trait]
impl AnnotationExporter for LabelStudioExporter {
    async fn export(&self, exports_root: &Path) -> Result<PathBuf> {
        let url = self.export_url()?;
        info!(url = %url, "Requesting YOLO export from annotation tool");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| PipelineError::Export(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Export(format!("{status}: {body}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Export(format!("failed to download archive: {e}")))?;
        debug!(bytes = bytes.len(), "Downloaded export archive");

        let export_dir = exports_root.join(format!(
            "yolo_export_{}",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        extract_archive(&bytes, &export_dir)?;

        info!(export_dir = %export_dir.display(), "Export extracted");
        Ok(export_dir)
    }
}

/// Unpack a ZIP archive into `dest`
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| PipelineError::io(dest, e))?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::Export(format!("invalid export archive: {e}")))?;
    archive
        .extract(dest)
        .map_err(|e| PipelineError::Export(format!("failed to extract archive: {e}")))
}

/// Most recently modified directory directly under `exports_root`
pub fn latest_export_dir(exports_root: &Path) -> Result<PathBuf> {
    let entries = match fs::read_dir(exports_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::NoExportFound(exports_root.to_path_buf()))
        }
        Err(e) => return Err(PipelineError::io(exports_root, e)),
    };

    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.path())
        })
        .max()
        .map(|(_, path)| path)
        .ok_or_else(|| PipelineError::NoExportFound(exports_root.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn export_config(token: Option<&str>) -> ExportConfig {
        ExportConfig {
            api_token: token.map(|t| t.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_token_is_required() {
        assert!(matches!(
            LabelStudioExporter::new(&export_config(None)),
            Err(PipelineError::Config(_))
        ));
        assert!(LabelStudioExporter::new(&export_config(Some("  "))).is_err());
    }

    #[test]
    fn test_export_url() {
        let exporter = LabelStudioExporter::new(&ExportConfig {
            url: "http://labels.internal:8080".to_string(),
            project_id: 7,
            api_token: Some("secret".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            exporter.export_url().unwrap().as_str(),
            "http://labels.internal:8080/api/projects/7/export?exportType=YOLO"
        );
    }

    #[test]
    fn test_extract_archive() {
        let mut buffer = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buffer));
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("labels/aa-part.txt", options).unwrap();
            zip.write_all(b"0 0.5 0.5 0.1 0.1").unwrap();
            zip.start_file("classes.txt", options).unwrap();
            zip.write_all(b"dentado").unwrap();
            zip.finish().unwrap();
        }

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("yolo_export");
        extract_archive(&buffer, &dest).unwrap();

        assert!(dest.join("labels/aa-part.txt").is_file());
        assert!(dest.join("classes.txt").is_file());
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let result = extract_archive(b"not a zip", &temp_dir.path().join("x"));
        assert!(matches!(result, Err(PipelineError::Export(_))));
    }

    #[test]
    fn test_latest_export_dir() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("yolo_export_1")).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::create_dir_all(root.join("yolo_export_2")).unwrap();
        fs::write(root.join("stray.zip"), b"zip").unwrap();

        assert_eq!(latest_export_dir(root).unwrap(), root.join("yolo_export_2"));
    }

    #[test]
    fn test_latest_export_dir_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            latest_export_dir(temp_dir.path()),
            Err(PipelineError::NoExportFound(_))
        ));
        assert!(matches!(
            latest_export_dir(&temp_dir.path().join("missing")),
            Err(PipelineError::NoExportFound(_))
        ));
    }
}
