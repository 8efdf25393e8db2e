use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::ReviewEntry;
use crate::db::types::{ReviewPriority, ReviewReason, ReviewStatus};

#[derive(Debug, Serialize)]
pub(crate) struct ReviewReasonInfo {
    pub(crate) code: ReviewReason,
    pub(crate) description: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReviewResponse {
    pub(crate) id: String,
    pub(crate) script_id: String,
    pub(crate) evaluation_id: Option<String>,
    pub(crate) reasons: Vec<ReviewReasonInfo>,
    pub(crate) priority: ReviewPriority,
    pub(crate) status: ReviewStatus,
    pub(crate) original_score: f64,
    pub(crate) manual_score: Option<f64>,
    pub(crate) reviewer_notes: String,
    pub(crate) flagged_at: String,
    pub(crate) resolved_at: Option<String>,
}

impl ReviewResponse {
    pub(crate) fn from_model(entry: ReviewEntry) -> Self {
        Self {
            id: entry.id,
            script_id: entry.script_id,
            evaluation_id: entry.evaluation_id,
            reasons: entry
                .reasons
                .0
                .into_iter()
                .map(|reason| ReviewReasonInfo {
                    code: reason,
                    description: reason.description().to_string(),
                })
                .collect(),
            priority: ReviewPriority::from_i16(entry.priority),
            status: entry.status,
            original_score: entry.original_score,
            manual_score: entry.manual_score,
            reviewer_notes: entry.reviewer_notes,
            flagged_at: format_primitive(entry.flagged_at),
            resolved_at: entry.resolved_at.map(format_primitive),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ReviewStatsResponse {
    pub(crate) pending: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ReviewResolve {
    #[validate(range(min = 0.0, message = "manual_score must be non-negative"))]
    pub(crate) manual_score: Option<f64>,
    #[serde(default)]
    #[validate(length(max = 4000, message = "reviewer_notes too long"))]
    pub(crate) reviewer_notes: String,
}
