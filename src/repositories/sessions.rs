use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::ExamSession;
use crate::db::types::{ScriptStage, ScriptStatus, SessionStatus};

const COLUMNS: &str = "id, name, scheme_id, total_scripts, processed_count, failed_count, \
     status, created_at, completed_at";

pub(crate) async fn create(
    pool: &PgPool,
    id: &str,
    name: &str,
    scheme_id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO exam_sessions (id, name, scheme_id, status, created_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(name)
    .bind(scheme_id)
    .bind(SessionStatus::Pending)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list(pool: &PgPool) -> Result<Vec<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions ORDER BY created_at DESC, id"
    ))
    .fetch_all(pool)
    .await
}

/// Registers a freshly accepted batch against the session.
pub(crate) async fn add_scripts(
    pool: &PgPool,
    id: &str,
    count: i32,
) -> Result<Option<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "UPDATE exam_sessions
         SET total_scripts = total_scripts + $2,
             status = CASE WHEN status = $3 THEN $4 ELSE status END
         WHERE id = $1
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(count)
    .bind(SessionStatus::Pending)
    .bind(SessionStatus::Processing)
    .fetch_optional(pool)
    .await
}

/// Bumps the processed or failed counter for one terminal script.
pub(crate) async fn record_script_outcome(
    pool: &PgPool,
    id: &str,
    failed: bool,
) -> Result<Option<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "UPDATE exam_sessions
         SET processed_count = processed_count + CASE WHEN $2 THEN 0 ELSE 1 END,
             failed_count = failed_count + CASE WHEN $2 THEN 1 ELSE 0 END
         WHERE id = $1
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(failed)
    .fetch_optional(pool)
    .await
}

/// Closes the session once every script reached a terminal status. The guard
/// on the current status makes the call idempotent under concurrent workers.
pub(crate) async fn finalize_if_done(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "UPDATE exam_sessions
         SET status = CASE WHEN failed_count >= total_scripts THEN $2 ELSE $3 END,
             completed_at = $4
         WHERE id = $1
           AND status IN ($5, $6)
           AND total_scripts > 0
           AND processed_count + failed_count >= total_scripts
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(SessionStatus::Failed)
    .bind(SessionStatus::Completed)
    .bind(now)
    .bind(SessionStatus::Pending)
    .bind(SessionStatus::Processing)
    .fetch_optional(pool)
    .await
}

/// Per-stage counts for the session progress endpoint.
pub(crate) async fn stage_counts(
    pool: &PgPool,
    id: &str,
) -> Result<Vec<(ScriptStage, ScriptStatus, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (ScriptStage, ScriptStatus, i64)>(
        "SELECT stage, status, COUNT(*)
         FROM scripts
         WHERE session_id = $1
         GROUP BY stage, status",
    )
    .bind(id)
    .fetch_all(pool)
    .await
}
