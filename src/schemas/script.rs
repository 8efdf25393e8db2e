use serde::Serialize;

use crate::core::time::format_primitive;
use crate::db::models::Script;
use crate::db::types::{DispatchMode, ScriptStage, ScriptStatus};
use crate::pipeline::dispatch::FileOutcome;

#[derive(Debug, Serialize)]
pub(crate) struct ScriptResponse {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) student_name: String,
    pub(crate) student_id: String,
    pub(crate) file_name: String,
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
    pub(crate) details: serde_json::Value,
    pub(crate) last_error: Option<String>,
    pub(crate) created_at: String,
    pub(crate) processed_at: Option<String>,
    pub(crate) updated_at: String,
}

impl ScriptResponse {
    pub(crate) fn from_model(script: Script) -> Self {
        Self {
            id: script.id,
            session_id: script.session_id,
            student_name: script.student_name,
            student_id: script.student_id,
            file_name: script.file_name,
            dispatch_mode: script.dispatch_mode,
            task_id: script.task_id,
            stage: script.stage,
            status: script.status,
            progress: script.progress,
            stage_description: script.stage_description,
            estimated_remaining_seconds: script.estimated_remaining_seconds,
            ocr_confidence: script.ocr_confidence,
            evaluation_confidence: script.evaluation_confidence,
            verification_confidence: script.verification_confidence,
            details: script.details.0,
            last_error: script.last_error,
            created_at: format_primitive(script.created_at),
            processed_at: script.processed_at.map(format_primitive),
            updated_at: format_primitive(script.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchUploadResponse {
    pub(crate) session_id: String,
    pub(crate) dispatch_mode: DispatchMode,
    pub(crate) accepted: usize,
    pub(crate) rejected: usize,
    pub(crate) files: Vec<FileOutcome>,
}
