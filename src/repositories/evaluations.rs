use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{Evaluation, QuestionScore, SessionResult, VerificationOutcome};

const COLUMNS: &str = "id, script_id, session_id, total_score, max_score, percentage, \
     question_scores, verification, created_at";

pub(crate) struct CreateEvaluationParams {
    pub(crate) id: String,
    pub(crate) script_id: String,
    pub(crate) session_id: String,
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) question_scores: Vec<QuestionScore>,
    pub(crate) now: PrimitiveDateTime,
}

/// One evaluation per script, latest write wins: a re-run (e.g. after a
/// stale-claim release) replaces the scores and clears the now-stale
/// verification instead of inserting a duplicate. Returns the id of the row
/// that holds the scores, which may predate this call.
pub(crate) async fn create(
    pool: &PgPool,
    params: &CreateEvaluationParams,
) -> Result<String, sqlx::Error> {
    let percentage = if params.max_score > 0.0 {
        params.total_score / params.max_score * 100.0
    } else {
        0.0
    };

    sqlx::query_scalar::<_, String>(
        "INSERT INTO evaluations (id, script_id, session_id, total_score, max_score, percentage, \
         question_scores, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (script_id)
         DO UPDATE SET total_score = EXCLUDED.total_score,
                       max_score = EXCLUDED.max_score,
                       percentage = EXCLUDED.percentage,
                       question_scores = EXCLUDED.question_scores,
                       verification = NULL,
                       created_at = EXCLUDED.created_at
         RETURNING id",
    )
    .bind(&params.id)
    .bind(&params.script_id)
    .bind(&params.session_id)
    .bind(params.total_score)
    .bind(params.max_score)
    .bind(percentage)
    .bind(Json(&params.question_scores))
    .bind(params.now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn set_verification(
    pool: &PgPool,
    id: &str,
    outcome: &VerificationOutcome,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE evaluations SET verification = $2 WHERE id = $1")
        .bind(id)
        .bind(Json(outcome))
        .execute(pool)
        .await?;

    Ok(())
}

pub(crate) async fn find_by_script(
    pool: &PgPool,
    script_id: &str,
) -> Result<Option<Evaluation>, sqlx::Error> {
    sqlx::query_as::<_, Evaluation>(&format!(
        "SELECT {COLUMNS} FROM evaluations WHERE script_id = $1"
    ))
    .bind(script_id)
    .fetch_optional(pool)
    .await
}

/// Results listing: every evaluation in the session, each joined with the
/// manual score of the latest resolved review for its script. The original
/// score column is never touched by a review.
pub(crate) async fn list_by_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<SessionResult>, sqlx::Error> {
    sqlx::query_as::<_, SessionResult>(
        "SELECT e.id, e.script_id, e.session_id, e.total_score, e.max_score, e.percentage, \
         e.question_scores, e.verification, e.created_at, r.manual_score
         FROM evaluations e
         LEFT JOIN LATERAL (
             SELECT manual_score FROM review_entries
             WHERE script_id = e.script_id
               AND status = 'resolved'
               AND manual_score IS NOT NULL
             ORDER BY resolved_at DESC
             LIMIT 1
         ) r ON TRUE
         WHERE e.session_id = $1
         ORDER BY e.created_at, e.id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
}
