//! Persisted evaluation history
//!
//! Two independent files:
//! - an append-only CSV log (`timestamp,metric`) of every evaluation of the
//!   deployed model
//! - a single-line pointer to the dataset the last run evaluated on
//!
//! Malformed rows are skipped with a warning; decisions use the last
//! well-formed record.

use crate::error::{PipelineError, Result};
use crate::fsutil::{ensure_parent, write_atomic};
use crate::models::MetricRecord;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Header row written when the log is created
pub const HISTORY_HEADER: &str = "timestamp,metric";

/// Evaluation history backed by a CSV log and a dataset pointer file
#[derive(Debug, Clone)]
pub struct EvaluationHistory {
    history_file: PathBuf,
    pointer_file: PathBuf,
}

impl EvaluationHistory {
    pub fn new(history_file: impl Into<PathBuf>, pointer_file: impl Into<PathBuf>) -> Self {
        Self {
            history_file: history_file.into(),
            pointer_file: pointer_file.into(),
        }
    }

    pub fn history_file(&self) -> &Path {
        &self.history_file
    }

    /// Append a record stamped with the current time
    pub fn append(&self, metric: f64) -> Result<MetricRecord> {
        self.append_at(metric, Utc::now())
    }

    /// Append a record with an explicit timestamp
    ///
    /// A timestamp earlier than the last record is clamped to it so the log
    /// stays monotonic even if the wall clock steps back.
    pub fn append_at(&self, metric: f64, timestamp: DateTime<Utc>) -> Result<MetricRecord> {
        if !metric.is_finite() {
            return Err(PipelineError::Config(format!(
                "refusing to record non-finite metric {metric}"
            )));
        }

        let timestamp = match self.last_record()? {
            Some(last) if last.timestamp > timestamp => last.timestamp,
            _ => timestamp,
        };

        ensure_parent(&self.history_file)?;
        let existing = match fs::read(&self.history_file) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(PipelineError::io(&self.history_file, e)),
        };

        let mut chunk = String::new();
        match &existing {
            None => {
                chunk.push_str(HISTORY_HEADER);
                chunk.push('\n');
            }
            Some(bytes) if bytes.is_empty() => {
                chunk.push_str(HISTORY_HEADER);
                chunk.push('\n');
            }
            // Terminate a torn trailing row so the new record starts on its own line
            Some(bytes) if bytes.last() != Some(&b'\n') => chunk.push('\n'),
            Some(_) => {}
        }
        chunk.push_str(&format!(
            "{},{}\n",
            timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            metric
        ));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_file)
            .map_err(|e| PipelineError::io(&self.history_file, e))?;
        file.write_all(chunk.as_bytes())
            .map_err(|e| PipelineError::io(&self.history_file, e))?;
        file.sync_all()
            .map_err(|e| PipelineError::io(&self.history_file, e))?;

        debug!(
            path = %self.history_file.display(),
            metric = metric,
            "Appended evaluation record"
        );

        Ok(MetricRecord { timestamp, metric })
    }

    /// All well-formed records in append order
    ///
    /// A missing log means no history, not a failure.
    pub fn records(&self) -> Result<Vec<MetricRecord>> {
        let content = match fs::read_to_string(&self.history_file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::io(&self.history_file, e)),
        };

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || (line_no == 0 && is_header(line)) {
                continue;
            }
            match parse_row(line) {
                Some(record) => records.push(record),
                None => warn!(
                    path = %self.history_file.display(),
                    line = line_no + 1,
                    row = %line,
                    "Skipping malformed history row"
                ),
            }
        }

        Ok(records)
    }

    /// Most recent well-formed record
    pub fn last_record(&self) -> Result<Option<MetricRecord>> {
        Ok(self.records()?.pop())
    }

    /// Metric of the most recent record, `None` for a missing or header-only log
    pub fn last_metric(&self) -> Result<Option<f64>> {
        Ok(self.last_record()?.map(|r| r.metric))
    }

    /// Dataset the previous run evaluated on
    pub fn last_dataset_used(&self) -> Result<Option<PathBuf>> {
        match fs::read_to_string(&self.pointer_file) {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(PathBuf::from(trimmed)))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::io(&self.pointer_file, e)),
        }
    }

    /// Overwrite the dataset pointer
    pub fn record_dataset_used(&self, dataset: &Path) -> Result<()> {
        write_atomic(&self.pointer_file, dataset.to_string_lossy().as_bytes())
    }
}

fn is_header(line: &str) -> bool {
    line.split(',')
        .next()
        .map(|first| first.trim().eq_ignore_ascii_case("timestamp"))
        .unwrap_or(false)
}

fn parse_row(line: &str) -> Option<MetricRecord> {
    let mut fields = line.split(',');
    let timestamp = parse_timestamp(fields.next()?.trim())?;
    let metric: f64 = fields.next()?.trim().parse().ok()?;
    if fields.next().is_some() || !metric.is_finite() {
        return None;
    }
    Some(MetricRecord { timestamp, metric })
}

/// RFC 3339, or a naive ISO-8601 timestamp taken as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn history_in(temp_dir: &TempDir) -> EvaluationHistory {
        EvaluationHistory::new(
            temp_dir.path().join("history/eval_history.csv"),
            temp_dir.path().join("history/last_eval_export.txt"),
        )
    }

    #[test]
    fn test_missing_store_means_no_history() {
        let temp_dir = TempDir::new().unwrap();
        let history = history_in(&temp_dir);

        assert_eq!(history.last_metric().unwrap(), None);
        assert!(history.records().unwrap().is_empty());
        assert_eq!(history.last_dataset_used().unwrap(), None);
    }

    #[test]
    fn test_append_creates_header_and_returns_last() {
        let temp_dir = TempDir::new().unwrap();
        let history = history_in(&temp_dir);

        history.append(0.55).unwrap();
        assert_eq!(history.last_metric().unwrap(), Some(0.55));

        let content = fs::read_to_string(history.history_file()).unwrap();
        assert!(content.starts_with("timestamp,metric\n"));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_header_only_store_has_no_last_metric() {
        let temp_dir = TempDir::new().unwrap();
        let history = history_in(&temp_dir);
        fs::create_dir_all(temp_dir.path().join("history")).unwrap();
        fs::write(history.history_file(), "timestamp,map50\n").unwrap();

        assert_eq!(history.last_metric().unwrap(), None);
    }

    #[test]
    fn test_records_replay_in_append_order() {
        let temp_dir = TempDir::new().unwrap();
        let history = history_in(&temp_dir);

        let metrics = [0.70, 0.69, 0.61, 0.72];
        for m in metrics {
            history.append(m).unwrap();
        }

        let records = history.records().unwrap();
        let replayed: Vec<f64> = records.iter().map(|r| r.metric).collect();
        assert_eq!(replayed, metrics.to_vec());
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_timestamp_clamped_to_stay_monotonic() {
        let temp_dir = TempDir::new().unwrap();
        let history = history_in(&temp_dir);
        let later = Utc.with_ymd_and_hms(2026, 5, 2, 12, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();

        history.append_at(0.7, later).unwrap();
        let record = history.append_at(0.6, earlier).unwrap();

        assert_eq!(record.timestamp, later);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let history = history_in(&temp_dir);
        fs::create_dir_all(temp_dir.path().join("history")).unwrap();
        fs::write(
            history.history_file(),
            "timestamp,map50\n2026-01-01T10:00:00.000001,0.71\nnot-a-date,0.5\n2026-01-02T10:00:00Z,0.6",
        )
        .unwrap();

        let records = history.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(history.last_metric().unwrap(), Some(0.6));
    }

    #[test]
    fn test_torn_trailing_row_does_not_corrupt_next_append() {
        let temp_dir = TempDir::new().unwrap();
        let history = history_in(&temp_dir);
        fs::create_dir_all(temp_dir.path().join("history")).unwrap();
        fs::write(
            history.history_file(),
            "timestamp,metric\n2026-01-01T10:00:00Z,0.71\n2026-01-02T1",
        )
        .unwrap();

        assert_eq!(history.last_metric().unwrap(), Some(0.71));
        history.append(0.64).unwrap();

        assert_eq!(history.last_metric().unwrap(), Some(0.64));
        assert_eq!(history.records().unwrap().len(), 2);
    }

    #[test]
    fn test_rejects_non_finite_metric() {
        let temp_dir = TempDir::new().unwrap();
        let history = history_in(&temp_dir);
        assert!(history.append(f64::NAN).is_err());
        assert!(!history.history_file().exists());
    }

    #[test]
    fn test_dataset_pointer_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let history = history_in(&temp_dir);

        history
            .record_dataset_used(Path::new("exports/yolo_export_20260101_100000"))
            .unwrap();
        history.record_dataset_used(Path::new("datasets/manual")).unwrap();

        assert_eq!(
            history.last_dataset_used().unwrap(),
            Some(PathBuf::from("datasets/manual"))
        );
    }
}
