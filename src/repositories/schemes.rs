use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{MarkingScheme, SchemeQuestion};

const COLUMNS: &str =
    "id, name, subject, total_marks, passing_marks, questions, created_at, updated_at";

pub(crate) struct CreateSchemeParams {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) subject: String,
    pub(crate) total_marks: f64,
    pub(crate) passing_marks: f64,
    pub(crate) questions: Vec<SchemeQuestion>,
    pub(crate) now: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, params: &CreateSchemeParams) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO marking_schemes (id, name, subject, total_marks, passing_marks, questions, \
         created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $7)",
    )
    .bind(&params.id)
    .bind(&params.name)
    .bind(&params.subject)
    .bind(params.total_marks)
    .bind(params.passing_marks)
    .bind(Json(&params.questions))
    .bind(params.now)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<MarkingScheme>, sqlx::Error> {
    sqlx::query_as::<_, MarkingScheme>(&format!(
        "SELECT {COLUMNS} FROM marking_schemes WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list(pool: &PgPool) -> Result<Vec<MarkingScheme>, sqlx::Error> {
    sqlx::query_as::<_, MarkingScheme>(&format!(
        "SELECT {COLUMNS} FROM marking_schemes ORDER BY created_at DESC, id"
    ))
    .fetch_all(pool)
    .await
}
