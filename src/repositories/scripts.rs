use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Script;
use crate::db::types::{DispatchMode, ScriptStage, ScriptStatus};
use crate::pipeline::tracker::PlannedUpdate;

const COLUMNS: &str = "id, session_id, student_name, student_id, file_name, image_path, \
     file_hash, dispatch_mode, task_id, stage, status, progress, stage_description, \
     estimated_remaining_seconds, ocr_confidence, evaluation_confidence, \
     verification_confidence, details, last_error, event_ts, claimed_at, created_at, \
     processed_at, updated_at";

pub(crate) struct CreateScriptParams {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) student_name: String,
    pub(crate) student_id: String,
    pub(crate) file_name: String,
    pub(crate) image_path: String,
    pub(crate) file_hash: Option<String>,
    pub(crate) dispatch_mode: DispatchMode,
    pub(crate) task_id: String,
    pub(crate) now: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, params: &CreateScriptParams) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO scripts (id, session_id, student_name, student_id, file_name, image_path, \
         file_hash, dispatch_mode, task_id, stage, status, progress, stage_description, \
         details, event_ts, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, $12, '{}'::jsonb, 0, $13, $13)",
    )
    .bind(&params.id)
    .bind(&params.session_id)
    .bind(&params.student_name)
    .bind(&params.student_id)
    .bind(&params.file_name)
    .bind(&params.image_path)
    .bind(&params.file_hash)
    .bind(params.dispatch_mode)
    .bind(&params.task_id)
    .bind(ScriptStage::Pending)
    .bind(ScriptStatus::Processing)
    .bind(ScriptStage::Pending.description())
    .bind(params.now)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Script>, sqlx::Error> {
    sqlx::query_as::<_, Script>(&format!("SELECT {COLUMNS} FROM scripts WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn find_by_task_id(
    pool: &PgPool,
    task_id: &str,
) -> Result<Option<Script>, sqlx::Error> {
    sqlx::query_as::<_, Script>(&format!("SELECT {COLUMNS} FROM scripts WHERE task_id = $1"))
        .bind(task_id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_by_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<Script>, sqlx::Error> {
    sqlx::query_as::<_, Script>(&format!(
        "SELECT {COLUMNS} FROM scripts WHERE session_id = $1 ORDER BY created_at, id"
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await
}

/// Conditional write: lands only if the row still carries the event timestamp
/// the caller planned against.
pub(crate) async fn apply_event(
    pool: &PgPool,
    id: &str,
    expected_ts: i64,
    planned: &PlannedUpdate,
) -> Result<u64, sqlx::Error> {
    let now = crate::core::time::primitive_now_utc();
    let terminal = planned.status.is_terminal();
    let details_patch =
        planned.details_patch.clone().unwrap_or_else(|| serde_json::json!({}));

    let result = sqlx::query(
        "UPDATE scripts
         SET stage = $3,
             status = $4,
             progress = $5,
             stage_description = $6,
             estimated_remaining_seconds = $7,
             event_ts = $8,
             ocr_confidence = COALESCE($9, ocr_confidence),
             evaluation_confidence = COALESCE($10, evaluation_confidence),
             verification_confidence = COALESCE($11, verification_confidence),
             last_error = COALESCE($12, last_error),
             details = details || $13,
             processed_at = CASE WHEN $14 THEN $15 ELSE processed_at END,
             updated_at = $15
         WHERE id = $1 AND event_ts = $2",
    )
    .bind(id)
    .bind(expected_ts)
    .bind(planned.stage)
    .bind(planned.status)
    .bind(planned.progress)
    .bind(&planned.stage_description)
    .bind(planned.estimated_remaining_seconds)
    .bind(planned.event_ts)
    .bind(planned.ocr_confidence)
    .bind(planned.evaluation_confidence)
    .bind(planned.verification_confidence)
    .bind(&planned.error)
    .bind(Json(details_patch))
    .bind(terminal)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Claims the oldest unclaimed queued script. SKIP LOCKED keeps concurrent
/// workers from fighting over the same row.
pub(crate) async fn claim_next_queued(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "WITH candidate AS (
            SELECT id
            FROM scripts
            WHERE status = $1
              AND dispatch_mode = $2
              AND claimed_at IS NULL
            ORDER BY created_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE scripts
        SET claimed_at = $3
        FROM candidate
        WHERE scripts.id = candidate.id
        RETURNING scripts.id",
    )
    .bind(ScriptStatus::Processing)
    .bind(DispatchMode::Queued)
    .bind(now)
    .fetch_optional(pool)
    .await
}

/// Returns claims to the queue when their worker died mid-script.
pub(crate) async fn recover_stale_claims(
    pool: &PgPool,
    cutoff: PrimitiveDateTime,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "UPDATE scripts
         SET claimed_at = NULL
         WHERE status = $1
           AND claimed_at IS NOT NULL
           AND claimed_at < $2
         RETURNING id",
    )
    .bind(ScriptStatus::Processing)
    .bind(cutoff)
    .fetch_all(pool)
    .await
}
