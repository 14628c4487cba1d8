// Module: Pipeline
// The four-stage data pipeline a single run's data moves through:
// raw capture -> staging -> processed -> persisted. Each stage is a gate —
// data cannot advance without passing it, and nothing is mutated silently.

pub mod extraction;
pub mod heuristic;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use extraction::ExtractionRecord;

/// Metadata for a run, written alongside its records once the run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub target_url: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_records: usize,
    #[serde(default)]
    pub total_signals: usize,
    #[serde(default = "default_extraction_mode")]
    pub extraction_mode: String,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_extraction_mode() -> String {
    "heuristic".to_string()
}

fn default_status() -> String {
    "running".to_string()
}

impl RunMetadata {
    pub fn new(run_id: impl Into<String>, target_url: impl Into<String>, extraction_mode: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            target_url: target_url.into(),
            started_at: Utc::now(),
            completed_at: None,
            total_records: 0,
            total_signals: 0,
            extraction_mode: extraction_mode.into(),
            status: default_status(),
        }
    }
}

struct RawCapture {
    #[allow(dead_code)]
    html: String,
    #[allow(dead_code)]
    url: String,
    #[allow(dead_code)]
    dom_hash: String,
}

/// Manages the four-stage data pipeline for a single run.
///
/// Persist is atomic: either the full batch of processed records lands on
/// disk or none of it does. Partial data is never mistaken for complete
/// data.
pub struct PipelineManager {
    run_id: String,
    debug_mode: bool,
    run_dir: PathBuf,
    raw_dir: PathBuf,
    output_path: PathBuf,
    metadata_path: PathBuf,
    raw_captures: Vec<RawCapture>,
    staged_records: Vec<Value>,
    processed_records: Vec<ExtractionRecord>,
}

impl PipelineManager {
    pub fn new(run_id: impl Into<String>, data_dir: &Path, debug_mode: bool) -> std::io::Result<Self> {
        let run_id = run_id.into();
        let run_dir = data_dir.join(&run_id);
        let raw_dir = run_dir.join("raw");
        let staging_dir = run_dir.join("staging");
        std::fs::create_dir_all(&raw_dir)?;
        std::fs::create_dir_all(&staging_dir)?;

        Ok(Self {
            output_path: run_dir.join("records.jsonl"),
            metadata_path: run_dir.join("metadata.json"),
            run_dir,
            raw_dir,
            debug_mode,
            run_id,
            raw_captures: Vec::new(),
            staged_records: Vec::new(),
            processed_records: Vec::new(),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn processed_records(&self) -> &[ExtractionRecord] {
        &self.processed_records
    }

    // --- Stage 1: Raw Capture ---

    /// Stores a raw DOM capture. Kept on disk only in debug mode; otherwise
    /// held in memory until cleaned up after a successful persist.
    pub fn capture_raw(&mut self, html: &str, url: &str, dom_hash: &str, screenshot: Option<&[u8]>) {
        let idx = self.raw_captures.len();

        if self.debug_mode {
            let html_path = self.raw_dir.join(format!("capture_{idx}.html"));
            if let Err(err) = std::fs::write(&html_path, html) {
                tracing::warn!(run_id = %self.run_id, error = %err, "failed to write raw capture to debug dir");
            }
            if let Some(bytes) = screenshot {
                let png_path = self.raw_dir.join(format!("capture_{idx}.png"));
                if let Err(err) = std::fs::write(&png_path, bytes) {
                    tracing::warn!(run_id = %self.run_id, error = %err, "failed to write screenshot to debug dir");
                }
            }
        }

        self.raw_captures.push(RawCapture {
            html: html.to_string(),
            url: url.to_string(),
            dom_hash: dom_hash.to_string(),
        });
    }

    // --- Stage 2: Staging ---

    /// Moves cleaned content into staging. Gate: must be a non-empty object.
    pub fn stage_content(&mut self, cleaned_content: Value) -> bool {
        match &cleaned_content {
            Value::Object(map) if !map.is_empty() => {
                self.staged_records.push(cleaned_content);
                true
            }
            _ => false,
        }
    }

    // --- Stage 3: Processed ---

    /// Adds a schema-validated record to the processed stage.
    ///
    /// Gate: the record must carry at least one field.
    pub fn add_processed_record(&mut self, record: ExtractionRecord) -> bool {
        if !record.has_fields() {
            return false;
        }
        self.processed_records.push(record);
        true
    }

    // --- Stage 4: Persist ---

    /// Atomically persists all processed records to JSONL, then writes
    /// run metadata and cleans up raw captures unless in debug mode.
    /// Returns the number of records persisted.
    pub async fn persist(&mut self, mut metadata: RunMetadata) -> std::io::Result<usize> {
        if self.processed_records.is_empty() {
            return Ok(0);
        }

        let temp_path = self.output_path.with_extension("tmp");
        let mut body = String::new();
        for record in &self.processed_records {
            body.push_str(&serde_json::to_string(record).expect("ExtractionRecord always serializes"));
            body.push('\n');
        }

        if let Err(err) = tokio::fs::write(&temp_path, &body).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&temp_path, &self.output_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err);
        }

        let count = self.processed_records.len();
        metadata.total_records = count;
        metadata.completed_at = Some(Utc::now());
        let metadata_json = serde_json::to_string_pretty(&metadata).expect("RunMetadata always serializes");
        tokio::fs::write(&self.metadata_path, metadata_json).await?;

        if !self.debug_mode {
            self.cleanup_raw().await;
        }

        Ok(count)
    }

    async fn cleanup_raw(&mut self) {
        self.raw_captures.clear();
        let mut entries = match tokio::fs::read_dir(&self.raw_dir).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }

    /// Loads persisted records from a JSONL file.
    pub fn load_records(output_path: &Path) -> std::io::Result<Vec<ExtractionRecord>> {
        if !output_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(output_path)?;
        let mut records = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extraction::{FieldValue, RecordMetadata};
    use std::collections::HashMap;

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("conduit_pipeline_test_{}", uuid::Uuid::new_v4()))
    }

    fn sample_record() -> ExtractionRecord {
        let mut fields = HashMap::new();
        fields.insert(
            "title".to_string(),
            FieldValue::new(Value::String("Acme".into()), 0.9, None),
        );
        let metadata = RecordMetadata::new("https://x.test", "abc123", extraction::ExtractionMode::Heuristic);
        ExtractionRecord::new(fields, metadata, 1.0)
    }

    #[test]
    fn stage_content_rejects_empty_object() {
        let dir = test_dir();
        let mut pipeline = PipelineManager::new("run_test", &dir, false).unwrap();
        assert!(!pipeline.stage_content(serde_json::json!({})));
        assert!(pipeline.stage_content(serde_json::json!({"title": "Acme"})));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn add_processed_record_rejects_empty_fields() {
        let dir = test_dir();
        let mut pipeline = PipelineManager::new("run_test", &dir, false).unwrap();
        let empty = ExtractionRecord::new(
            HashMap::new(),
            RecordMetadata::new("https://x.test", "abc123", extraction::ExtractionMode::Heuristic),
            1.0,
        );
        assert!(!pipeline.add_processed_record(empty));
        assert!(pipeline.add_processed_record(sample_record()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn persist_is_atomic_and_round_trips() {
        let dir = test_dir();
        let mut pipeline = PipelineManager::new("run_test", &dir, false).unwrap();
        pipeline.add_processed_record(sample_record());

        let metadata = RunMetadata::new("run_test", "https://x.test", "heuristic");
        let count = pipeline.persist(metadata).await.unwrap();
        assert_eq!(count, 1);
        assert!(pipeline.output_path().exists());
        assert!(!pipeline.output_path().with_extension("tmp").exists());

        let loaded = PipelineManager::load_records(pipeline.output_path()).unwrap();
        assert_eq!(loaded.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn persist_with_no_records_writes_nothing() {
        let dir = test_dir();
        let mut pipeline = PipelineManager::new("run_test", &dir, false).unwrap();
        let metadata = RunMetadata::new("run_test", "https://x.test", "heuristic");
        let count = pipeline.persist(metadata).await.unwrap();
        assert_eq!(count, 0);
        assert!(!pipeline.output_path().exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn debug_mode_preserves_raw_captures_after_persist() {
        let dir = test_dir();
        let mut pipeline = PipelineManager::new("run_test", &dir, true).unwrap();
        pipeline.capture_raw("<html></html>", "https://x.test", "abc123", None);
        pipeline.add_processed_record(sample_record());
        let metadata = RunMetadata::new("run_test", "https://x.test", "heuristic");
        pipeline.persist(metadata).await.unwrap();

        let raw_html = pipeline.raw_dir.join("capture_0.html");
        assert!(raw_html.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
