use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;
use crate::db::models::ReviewEntry;
use crate::db::types::{ReviewPriority, ReviewReason, ReviewStatus};

const COLUMNS: &str = "id, script_id, evaluation_id, reasons, priority, status, original_score, \
     manual_score, reviewer_notes, flagged_at, resolved_at, updated_at";

pub(crate) struct UpsertReviewParams {
    pub(crate) script_id: String,
    pub(crate) evaluation_id: Option<String>,
    pub(crate) reasons: Vec<ReviewReason>,
    pub(crate) priority: ReviewPriority,
    pub(crate) original_score: f64,
}

/// One pending entry per script: re-flagging refreshes reasons, priority and
/// score but keeps the original flagged_at. Backed by the partial unique
/// index on pending entries.
pub(crate) async fn upsert_pending(
    pool: &PgPool,
    params: &UpsertReviewParams,
) -> Result<String, sqlx::Error> {
    let now = primitive_now_utc();
    sqlx::query_scalar::<_, String>(
        "INSERT INTO review_entries (id, script_id, evaluation_id, reasons, priority, status, \
         original_score, reviewer_notes, flagged_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, '', $8, $8)
         ON CONFLICT (script_id) WHERE status = 'pending'
         DO UPDATE SET reasons = EXCLUDED.reasons,
                       priority = EXCLUDED.priority,
                       evaluation_id = EXCLUDED.evaluation_id,
                       original_score = EXCLUDED.original_score,
                       updated_at = EXCLUDED.updated_at
         RETURNING id",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&params.script_id)
    .bind(&params.evaluation_id)
    .bind(Json(&params.reasons))
    .bind(params.priority.as_i16())
    .bind(ReviewStatus::Pending)
    .bind(params.original_score)
    .bind(now)
    .fetch_one(pool)
    .await
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ReviewFilter {
    pub(crate) status: Option<ReviewStatus>,
    pub(crate) priority: Option<ReviewPriority>,
    pub(crate) limit: i64,
    pub(crate) offset: i64,
}

/// Queue order: highest priority first, then longest-waiting.
pub(crate) async fn list(
    pool: &PgPool,
    filter: &ReviewFilter,
) -> Result<Vec<ReviewEntry>, sqlx::Error> {
    sqlx::query_as::<_, ReviewEntry>(&format!(
        "SELECT {COLUMNS} FROM review_entries
         WHERE ($1::reviewstatus IS NULL OR status = $1)
           AND ($2::smallint IS NULL OR priority = $2)
         ORDER BY priority, flagged_at, id
         LIMIT $3 OFFSET $4"
    ))
    .bind(filter.status)
    .bind(filter.priority.map(ReviewPriority::as_i16))
    .bind(filter.limit.clamp(1, 500))
    .bind(filter.offset.max(0))
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<ReviewEntry>, sqlx::Error> {
    sqlx::query_as::<_, ReviewEntry>(&format!(
        "SELECT {COLUMNS} FROM review_entries WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Single-shot resolve: the status guard makes the second resolver lose
/// cleanly instead of overwriting the first.
pub(crate) async fn resolve(
    pool: &PgPool,
    id: &str,
    manual_score: Option<f64>,
    reviewer_notes: &str,
    now: PrimitiveDateTime,
) -> Result<Option<ReviewEntry>, sqlx::Error> {
    sqlx::query_as::<_, ReviewEntry>(&format!(
        "UPDATE review_entries
         SET status = $2,
             manual_score = $3,
             reviewer_notes = $4,
             resolved_at = $5,
             updated_at = $5
         WHERE id = $1 AND status = $6
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(ReviewStatus::Resolved)
    .bind(manual_score)
    .bind(reviewer_notes)
    .bind(now)
    .bind(ReviewStatus::Pending)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn pending_count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM review_entries WHERE status = $1")
        .bind(ReviewStatus::Pending)
        .fetch_one(pool)
        .await
}
