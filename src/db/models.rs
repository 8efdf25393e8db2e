use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{
    DispatchMode, ReviewReason, ReviewStatus, ScriptStage, ScriptStatus, SessionStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct MarkingScheme {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) subject: String,
    pub(crate) total_marks: f64,
    pub(crate) passing_marks: f64,
    pub(crate) questions: Json<Vec<SchemeQuestion>>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SchemeQuestion {
    pub(crate) question_number: String,
    pub(crate) question_text: String,
    pub(crate) max_marks: f64,
    pub(crate) model_answer: String,
    #[serde(default)]
    pub(crate) keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamSession {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) scheme_id: String,
    pub(crate) total_scripts: i32,
    pub(crate) processed_count: i32,
    pub(crate) failed_count: i32,
    pub(crate) status: SessionStatus,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) completed_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Script {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) student_name: String,
    pub(crate) student_id: String,
    pub(crate) file_name: String,
    pub(crate) image_path: String,
    pub(crate) file_hash: Option<String>,
    pub(crate) dispatch_mode: DispatchMode,
    pub(crate) task_id: String,
    pub(crate) stage: ScriptStage,
    pub(crate) status: ScriptStatus,
    pub(crate) progress: i32,
    pub(crate) stage_description: String,
    pub(crate) estimated_remaining_seconds: Option<f64>,
    pub(crate) ocr_confidence: Option<f64>,
    pub(crate) evaluation_confidence: Option<f64>,
    pub(crate) verification_confidence: Option<f64>,
    pub(crate) details: Json<serde_json::Value>,
    pub(crate) last_error: Option<String>,
    pub(crate) event_ts: i64,
    pub(crate) claimed_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) processed_at: Option<PrimitiveDateTime>,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Evaluation {
    pub(crate) id: String,
    pub(crate) script_id: String,
    pub(crate) session_id: String,
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: f64,
    pub(crate) question_scores: Json<Vec<QuestionScore>>,
    pub(crate) verification: Option<Json<VerificationOutcome>>,
    pub(crate) created_at: PrimitiveDateTime,
}

/// Evaluation row joined with the manual score from its script's resolved
/// review entry, when one exists.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct SessionResult {
    #[sqlx(flatten)]
    pub(crate) evaluation: Evaluation,
    pub(crate) manual_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct QuestionScore {
    pub(crate) question_number: String,
    pub(crate) awarded_marks: f64,
    pub(crate) max_marks: f64,
    pub(crate) confidence: f64,
    #[serde(default)]
    pub(crate) feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VerificationOutcome {
    pub(crate) verified: bool,
    pub(crate) confidence: f64,
    pub(crate) adjusted_score: Option<f64>,
    #[serde(default)]
    pub(crate) notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ReviewEntry {
    pub(crate) id: String,
    pub(crate) script_id: String,
    pub(crate) evaluation_id: Option<String>,
    pub(crate) reasons: Json<Vec<ReviewReason>>,
    pub(crate) priority: i16,
    pub(crate) status: ReviewStatus,
    pub(crate) original_score: f64,
    pub(crate) manual_score: Option<f64>,
    pub(crate) reviewer_notes: String,
    pub(crate) flagged_at: PrimitiveDateTime,
    pub(crate) resolved_at: Option<PrimitiveDateTime>,
    pub(crate) updated_at: PrimitiveDateTime,
}
