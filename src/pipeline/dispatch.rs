use serde::Serialize;

use crate::db::types::{DispatchMode, ScriptStage, ScriptStatus};

impl DispatchMode {
    /// One decision per batch: small batches run inline within the request,
    /// larger ones go to the durable queue. Every script in the batch records
    /// the mode it was dispatched under.
    pub(crate) fn for_batch(file_count: usize, realtime_threshold: usize) -> Self {
        if file_count <= realtime_threshold {
            DispatchMode::Inline
        } else {
            DispatchMode::Queued
        }
    }
}

/// Terminal state of a file that was processed inside the upload request.
/// Queued files carry no result; callers poll the task handle instead.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct InlineResult {
    pub(crate) status: ScriptStatus,
    pub(crate) stage: ScriptStage,
    pub(crate) progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) total_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

/// Per-file result of a batch upload. Files fail independently; one bad file
/// never sinks its batch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub(crate) enum FileOutcome {
    Accepted {
        file_name: String,
        script_id: String,
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<InlineResult>,
    },
    Rejected {
        file_name: String,
        reason: String,
    },
}

/// Pulls student identity out of an upload filename. The convention is
/// `Name_Parts_STUDENTID.ext`; anything that does not match falls back to the
/// stem as the name with an unknown id.
pub(crate) fn parse_student_info(file_name: &str) -> (String, String) {
    let stem = file_name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file_name);

    let parts: Vec<&str> = stem.split('_').filter(|part| !part.is_empty()).collect();
    if parts.len() >= 2 {
        let last = parts[parts.len() - 1];
        if last.chars().all(|ch| ch.is_ascii_alphanumeric()) && last.chars().any(|ch| ch.is_ascii_digit()) {
            let name = parts[..parts.len() - 1].join(" ");
            return (name, last.to_string());
        }
    }

    (stem.replace('_', " "), "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_at_threshold_runs_inline() {
        assert_eq!(DispatchMode::for_batch(1, 5), DispatchMode::Inline);
        assert_eq!(DispatchMode::for_batch(5, 5), DispatchMode::Inline);
    }

    #[test]
    fn batch_above_threshold_is_queued() {
        assert_eq!(DispatchMode::for_batch(6, 5), DispatchMode::Queued);
        assert_eq!(DispatchMode::for_batch(200, 5), DispatchMode::Queued);
    }

    #[test]
    fn filename_with_id_suffix_parses() {
        let (name, id) = parse_student_info("John_Doe_12345.jpg");
        assert_eq!(name, "John Doe");
        assert_eq!(id, "12345");
    }

    #[test]
    fn filename_without_id_falls_back() {
        let (name, id) = parse_student_info("scan-batch-one.png");
        assert_eq!(name, "scan-batch-one");
        assert_eq!(id, "unknown");
    }

    #[test]
    fn id_must_contain_a_digit() {
        // "Smith" is not a student id even though it is the last segment.
        let (name, id) = parse_student_info("Jane_Smith.jpeg");
        assert_eq!(name, "Jane Smith");
        assert_eq!(id, "unknown");
    }

    #[test]
    fn inline_outcome_carries_terminal_result() {
        let outcome = FileOutcome::Accepted {
            file_name: "John_Doe_12345.jpg".to_string(),
            script_id: "script-1".to_string(),
            task_id: "task-1".to_string(),
            result: Some(InlineResult {
                status: ScriptStatus::Completed,
                stage: ScriptStage::Completed,
                progress: 100,
                total_score: Some(72.5),
                max_score: Some(100.0),
                error: None,
            }),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["result"]["status"], "completed");
        assert_eq!(value["result"]["progress"], 100);
        assert_eq!(value["result"]["total_score"], 72.5);
        assert!(value["result"].get("error").is_none());
    }

    #[test]
    fn queued_outcome_has_no_result_field() {
        let outcome = FileOutcome::Accepted {
            file_name: "scan.jpg".to_string(),
            script_id: "script-2".to_string(),
            task_id: "task-2".to_string(),
            result: None,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["task_id"], "task-2");
    }

    #[test]
    fn rejected_outcome_serializes_with_tag() {
        let outcome = FileOutcome::Rejected {
            file_name: "notes.txt".to_string(),
            reason: "unsupported extension".to_string(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "rejected");
        assert_eq!(value["reason"], "unsupported extension");
    }
}
