// Data model for one extracted record: a field map plus provenance metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One field's value alongside how confident we are in it and, for
/// heuristic/AI-assisted fields, where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: Value,
    confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_selector: Option<String>,
}

impl FieldValue {
    /// Clamps confidence into `[0, 1]` rather than rejecting out-of-range
    /// input outright — upstream sources (an LLM's self-reported
    /// confidence, in particular) are not trusted to respect the bound.
    pub fn new(value: Value, confidence: f64, source_selector: Option<String>) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            source_selector,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// The single choke point for normalizing a polymorphic AI-returned
    /// value into a `FieldValue`: if the raw value already looks like
    /// `{value, confidence, source_selector?}`, pass it through; otherwise
    /// wrap the scalar with the caller-supplied default confidence.
    pub fn normalize(raw: Value, default_confidence: f64) -> Self {
        if let Value::Object(ref map) = raw {
            if map.contains_key("value") {
                let value = map.get("value").cloned().unwrap_or(Value::Null);
                let confidence = map
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(default_confidence);
                let source_selector = map
                    .get("source_selector")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Self::new(value, confidence, source_selector);
            }
        }
        Self::new(raw, default_confidence, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    Heuristic,
    Ai,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source_url: String,
    pub dom_hash: String,
    #[serde(default = "Utc::now")]
    pub extracted_at: DateTime<Utc>,
    #[serde(default)]
    pub ai_model: String,
    pub extraction_mode: ExtractionMode,
}

impl RecordMetadata {
    pub fn new(source_url: impl Into<String>, dom_hash: impl Into<String>, extraction_mode: ExtractionMode) -> Self {
        Self {
            source_url: source_url.into(),
            dom_hash: dom_hash.into(),
            extracted_at: Utc::now(),
            ai_model: String::new(),
            extraction_mode,
        }
    }

    pub fn with_ai_model(mut self, model: impl Into<String>) -> Self {
        self.ai_model = model.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub fields: std::collections::HashMap<String, FieldValue>,
    pub metadata: RecordMetadata,
    #[serde(default = "default_completeness")]
    completeness_score: f64,
    #[serde(default)]
    pub is_partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
}

fn default_completeness() -> f64 {
    1.0
}

impl ExtractionRecord {
    pub fn new(
        fields: std::collections::HashMap<String, FieldValue>,
        metadata: RecordMetadata,
        completeness_score: f64,
    ) -> Self {
        let is_partial = completeness_score < 1.0;
        Self {
            fields,
            metadata,
            completeness_score: completeness_score.clamp(0.0, 1.0),
            is_partial,
            duplicate_of: None,
        }
    }

    pub fn completeness_score(&self) -> f64 {
        self.completeness_score
    }

    /// Acceptance gate for the Pipeline Manager: a record with no fields
    /// carries no information and is rejected before it ever reaches disk.
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn average_confidence(&self) -> f64 {
        if self.fields.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.fields.values().map(FieldValue::confidence).sum();
        sum / self.fields.len() as f64
    }

    pub fn flagged_field_count(&self, min_threshold: f64) -> usize {
        self.fields.values().filter(|f| f.confidence() < min_threshold).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped_into_range() {
        let f = FieldValue::new(Value::String("x".into()), 1.7, None);
        assert_eq!(f.confidence(), 1.0);
        let f = FieldValue::new(Value::String("x".into()), -0.3, None);
        assert_eq!(f.confidence(), 0.0);
    }

    #[test]
    fn normalize_passes_through_structured_values() {
        let raw = serde_json::json!({"value": "Acme", "confidence": 0.9, "source_selector": "h1"});
        let f = FieldValue::normalize(raw, 0.7);
        assert_eq!(f.value, Value::String("Acme".into()));
        assert_eq!(f.confidence(), 0.9);
        assert_eq!(f.source_selector.as_deref(), Some("h1"));
    }

    #[test]
    fn normalize_wraps_scalar_values_with_default_confidence() {
        let raw = serde_json::json!(42);
        let f = FieldValue::normalize(raw, 0.6);
        assert_eq!(f.value, serde_json::json!(42));
        assert_eq!(f.confidence(), 0.6);
        assert!(f.source_selector.is_none());
    }

    #[test]
    fn record_is_partial_iff_completeness_below_one() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("title".to_string(), FieldValue::new(Value::String("x".into()), 1.0, None));
        let metadata = RecordMetadata::new("https://x.test", "abc123", ExtractionMode::Heuristic);
        let record = ExtractionRecord::new(fields, metadata, 0.5);
        assert!(record.is_partial);
    }
}
