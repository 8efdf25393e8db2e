use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::time::now_micros;
use crate::db::types::{ScriptStage, ScriptStatus};

/// Cap on per-event detail entries. Extraction previews, score summaries and
/// the like go here; anything past the cap is dropped rather than ballooning
/// the row.
pub(crate) const MAX_DETAIL_ENTRIES: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct StageDetails {
    entries: BTreeMap<String, serde_json::Value>,
}

impl StageDetails {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns false when the entry was dropped because the cap was reached.
    pub(crate) fn insert(&mut self, key: &str, value: serde_json::Value) -> bool {
        if self.entries.len() >= MAX_DETAIL_ENTRIES && !self.entries.contains_key(key) {
            return false;
        }
        self.entries.insert(key.to_string(), value);
        true
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.entries).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// One observation from the pipeline: a stage was reached, or processing
/// failed. The tracker decides whether it lands.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProcessingEvent {
    pub(crate) stage: ScriptStage,
    pub(crate) status: ScriptStatus,
    pub(crate) event_ts: i64,
    pub(crate) ocr_confidence: Option<f64>,
    pub(crate) evaluation_confidence: Option<f64>,
    pub(crate) verification_confidence: Option<f64>,
    pub(crate) error: Option<String>,
    pub(crate) details: StageDetails,
}

impl ProcessingEvent {
    pub(crate) fn stage_reached(stage: ScriptStage) -> Self {
        let status = if stage == ScriptStage::Completed {
            ScriptStatus::Completed
        } else {
            ScriptStatus::Processing
        };
        Self {
            stage,
            status,
            event_ts: now_micros(),
            ocr_confidence: None,
            evaluation_confidence: None,
            verification_confidence: None,
            error: None,
            details: StageDetails::new(),
        }
    }

    /// A failure keeps the last stage the script reached; only the status and
    /// the error change.
    pub(crate) fn failed(last_stage: ScriptStage, error: impl Into<String>) -> Self {
        Self {
            stage: last_stage,
            status: ScriptStatus::Failed,
            event_ts: now_micros(),
            ocr_confidence: None,
            evaluation_confidence: None,
            verification_confidence: None,
            error: Some(error.into()),
            details: StageDetails::new(),
        }
    }

    pub(crate) fn with_ocr_confidence(mut self, confidence: f64) -> Self {
        self.ocr_confidence = Some(confidence);
        self
    }

    pub(crate) fn with_evaluation_confidence(mut self, confidence: f64) -> Self {
        self.evaluation_confidence = Some(confidence);
        self
    }

    pub(crate) fn with_verification_confidence(mut self, confidence: f64) -> Self {
        self.verification_confidence = Some(confidence);
        self
    }

    pub(crate) fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details.insert(key, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_drop_entries_past_the_cap() {
        let mut details = StageDetails::new();
        for index in 0..MAX_DETAIL_ENTRIES {
            assert!(details.insert(&format!("key-{index}"), serde_json::json!(index)));
        }
        assert!(!details.insert("one-too-many", serde_json::json!(true)));
        // Overwriting an existing key is still allowed at the cap.
        assert!(details.insert("key-0", serde_json::json!("updated")));
    }

    #[test]
    fn completed_stage_event_carries_completed_status() {
        let event = ProcessingEvent::stage_reached(ScriptStage::Completed);
        assert_eq!(event.status, ScriptStatus::Completed);
        let event = ProcessingEvent::stage_reached(ScriptStage::OcrCompleted);
        assert_eq!(event.status, ScriptStatus::Processing);
    }

    #[test]
    fn failed_event_keeps_the_last_stage() {
        let event = ProcessingEvent::failed(ScriptStage::ImageValidated, "ocr timed out");
        assert_eq!(event.stage, ScriptStage::ImageValidated);
        assert_eq!(event.status, ScriptStatus::Failed);
        assert_eq!(event.error.as_deref(), Some("ocr timed out"));
    }
}
