use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "scriptstage", rename_all = "snake_case")]
pub enum ScriptStage {
    Pending,
    DatabaseConnected,
    ImageValidated,
    OcrCompleted,
    EvaluationCompleted,
    VerificationCompleted,
    Completed,
}

impl ScriptStage {
    pub fn position(self) -> u8 {
        match self {
            ScriptStage::Pending => 0,
            ScriptStage::DatabaseConnected => 1,
            ScriptStage::ImageValidated => 2,
            ScriptStage::OcrCompleted => 3,
            ScriptStage::EvaluationCompleted => 4,
            ScriptStage::VerificationCompleted => 5,
            ScriptStage::Completed => 6,
        }
    }

    pub fn progress(self) -> i32 {
        match self {
            ScriptStage::Pending => 0,
            ScriptStage::DatabaseConnected => 5,
            ScriptStage::ImageValidated => 10,
            ScriptStage::OcrCompleted => 40,
            ScriptStage::EvaluationCompleted => 70,
            ScriptStage::VerificationCompleted => 90,
            ScriptStage::Completed => 100,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ScriptStage::Pending => "Waiting to start processing",
            ScriptStage::DatabaseConnected => "Connected to database, preparing script",
            ScriptStage::ImageValidated => "Script image validated",
            ScriptStage::OcrCompleted => "Text extraction completed",
            ScriptStage::EvaluationCompleted => "Answer evaluation completed",
            ScriptStage::VerificationCompleted => "Score verification completed",
            ScriptStage::Completed => "Processing completed",
        }
    }

    pub fn estimated_remaining_seconds(self) -> Option<f64> {
        match self {
            ScriptStage::Pending => Some(45.0),
            ScriptStage::DatabaseConnected => Some(40.0),
            ScriptStage::ImageValidated => Some(35.0),
            ScriptStage::OcrCompleted => Some(20.0),
            ScriptStage::EvaluationCompleted => Some(8.0),
            ScriptStage::VerificationCompleted => Some(3.0),
            ScriptStage::Completed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptStage::Pending => "pending",
            ScriptStage::DatabaseConnected => "database_connected",
            ScriptStage::ImageValidated => "image_validated",
            ScriptStage::OcrCompleted => "ocr_completed",
            ScriptStage::EvaluationCompleted => "evaluation_completed",
            ScriptStage::VerificationCompleted => "verification_completed",
            ScriptStage::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "scriptstatus", rename_all = "lowercase")]
pub enum ScriptStatus {
    Processing,
    Completed,
    Failed,
}

impl ScriptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScriptStatus::Completed | ScriptStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptStatus::Processing => "processing",
            ScriptStatus::Completed => "completed",
            ScriptStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "sessionstatus", rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "dispatchmode", rename_all = "lowercase")]
pub enum DispatchMode {
    Inline,
    Queued,
}

impl DispatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchMode::Inline => "inline",
            DispatchMode::Queued => "queued",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "reviewstatus", rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Resolved,
}

/// Why a script landed in the manual review queue. Stored as a JSONB array on
/// the review entry so one entry can carry several reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    LowOcrConfidence,
    LowEvaluationConfidence,
    LowVerificationConfidence,
    BelowPassingMarks,
    ProcessingError,
}

impl ReviewReason {
    pub fn description(self) -> &'static str {
        match self {
            ReviewReason::LowOcrConfidence => "OCR confidence below threshold",
            ReviewReason::LowEvaluationConfidence => "Evaluation confidence below threshold",
            ReviewReason::LowVerificationConfidence => "Verification confidence below threshold",
            ReviewReason::BelowPassingMarks => "Score below passing marks",
            ReviewReason::ProcessingError => "Processing failed before completion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPriority {
    High,
    Medium,
    Low,
}

impl ReviewPriority {
    pub fn as_i16(self) -> i16 {
        match self {
            ReviewPriority::High => 1,
            ReviewPriority::Medium => 2,
            ReviewPriority::Low => 3,
        }
    }

    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => ReviewPriority::High,
            2 => ReviewPriority::Medium,
            _ => ReviewPriority::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_positions_strictly_increase() {
        let stages = [
            ScriptStage::Pending,
            ScriptStage::DatabaseConnected,
            ScriptStage::ImageValidated,
            ScriptStage::OcrCompleted,
            ScriptStage::EvaluationCompleted,
            ScriptStage::VerificationCompleted,
            ScriptStage::Completed,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].position() < pair[1].position());
            assert!(pair[0].progress() < pair[1].progress());
        }
    }

    #[test]
    fn completed_stage_has_no_remaining_estimate() {
        assert_eq!(ScriptStage::Completed.estimated_remaining_seconds(), None);
        assert!(ScriptStage::Pending.estimated_remaining_seconds().is_some());
    }

    #[test]
    fn review_priority_round_trips_through_i16() {
        for priority in [ReviewPriority::High, ReviewPriority::Medium, ReviewPriority::Low] {
            assert_eq!(ReviewPriority::from_i16(priority.as_i16()), priority);
        }
    }

    #[test]
    fn review_reason_serializes_snake_case() {
        let json = serde_json::to_string(&ReviewReason::LowOcrConfidence).unwrap();
        assert_eq!(json, "\"low_ocr_confidence\"");
    }
}
