use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{ExamSession, QuestionScore, SessionResult, VerificationOutcome};
use crate::db::types::{ScriptStage, ScriptStatus, SessionStatus};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SessionCreate {
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub(crate) name: String,
    #[validate(length(min = 1, message = "scheme_id must not be empty"))]
    pub(crate) scheme_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) scheme_id: String,
    pub(crate) total_scripts: i32,
    pub(crate) processed_count: i32,
    pub(crate) failed_count: i32,
    pub(crate) status: SessionStatus,
    pub(crate) created_at: String,
    pub(crate) completed_at: Option<String>,
}

impl SessionResponse {
    pub(crate) fn from_model(session: ExamSession) -> Self {
        Self {
            id: session.id,
            name: session.name,
            scheme_id: session.scheme_id,
            total_scripts: session.total_scripts,
            processed_count: session.processed_count,
            failed_count: session.failed_count,
            status: session.status,
            created_at: format_primitive(session.created_at),
            completed_at: session.completed_at.map(format_primitive),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StageCount {
    pub(crate) stage: ScriptStage,
    pub(crate) status: ScriptStatus,
    pub(crate) count: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionProgressResponse {
    pub(crate) session: SessionResponse,
    pub(crate) stages: Vec<StageCount>,
}

/// `final_score` prefers a reviewer's manual score; `total_score` always
/// keeps what the pipeline awarded.
#[derive(Debug, Serialize)]
pub(crate) struct EvaluationResponse {
    pub(crate) id: String,
    pub(crate) script_id: String,
    pub(crate) session_id: String,
    pub(crate) total_score: f64,
    pub(crate) manual_score: Option<f64>,
    pub(crate) final_score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: f64,
    pub(crate) question_scores: Vec<QuestionScore>,
    pub(crate) verification: Option<VerificationOutcome>,
    pub(crate) created_at: String,
}

impl EvaluationResponse {
    pub(crate) fn from_result(result: SessionResult) -> Self {
        let evaluation = result.evaluation;
        let final_score = result.manual_score.unwrap_or(evaluation.total_score);
        Self {
            id: evaluation.id,
            script_id: evaluation.script_id,
            session_id: evaluation.session_id,
            total_score: evaluation.total_score,
            manual_score: result.manual_score,
            final_score,
            max_score: evaluation.max_score,
            percentage: evaluation.percentage,
            question_scores: evaluation.question_scores.0,
            verification: evaluation.verification.map(|value| value.0),
            created_at: format_primitive(evaluation.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResultsResponse {
    pub(crate) session: SessionResponse,
    pub(crate) evaluations: Vec<EvaluationResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Evaluation;
    use sqlx::types::Json;
    use time::macros::datetime;

    fn evaluation() -> Evaluation {
        Evaluation {
            id: "eval-1".to_string(),
            script_id: "script-1".to_string(),
            session_id: "session-1".to_string(),
            total_score: 55.0,
            max_score: 100.0,
            percentage: 55.0,
            question_scores: Json(Vec::new()),
            verification: None,
            created_at: datetime!(2026-03-01 09:00),
        }
    }

    #[test]
    fn final_score_prefers_manual_but_keeps_original() {
        let response = EvaluationResponse::from_result(SessionResult {
            evaluation: evaluation(),
            manual_score: Some(61.0),
        });
        assert_eq!(response.final_score, 61.0);
        assert_eq!(response.manual_score, Some(61.0));
        assert_eq!(response.total_score, 55.0);
    }

    #[test]
    fn final_score_falls_back_to_pipeline_score() {
        let response = EvaluationResponse::from_result(SessionResult {
            evaluation: evaluation(),
            manual_score: None,
        });
        assert_eq!(response.final_score, 55.0);
        assert!(response.manual_score.is_none());
    }
}
