use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::SchemeQuestion;
use crate::repositories::schemes;
use crate::schemas::scheme::{SchemeCreate, SchemeResponse};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_scheme).get(list_schemes))
        .route("/:scheme_id", get(get_scheme))
}

async fn create_scheme(
    State(state): State<AppState>,
    Json(payload): Json<SchemeCreate>,
) -> Result<Json<SchemeResponse>, ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let questions: Vec<SchemeQuestion> = payload
        .questions
        .into_iter()
        .map(|question| SchemeQuestion {
            question_number: question.question_number,
            question_text: question.question_text,
            max_marks: question.max_marks,
            model_answer: question.model_answer,
            keywords: question.keywords,
        })
        .collect();

    let marks_sum: f64 = questions.iter().map(|question| question.max_marks).sum();
    if (marks_sum - payload.total_marks).abs() > 1e-6 {
        return Err(ApiError::BadRequest(format!(
            "question marks sum to {marks_sum}, expected total_marks {}",
            payload.total_marks
        )));
    }
    if payload.passing_marks > payload.total_marks {
        return Err(ApiError::BadRequest(
            "passing_marks cannot exceed total_marks".to_string(),
        ));
    }

    let params = schemes::CreateSchemeParams {
        id: Uuid::new_v4().to_string(),
        name: payload.name,
        subject: payload.subject,
        total_marks: payload.total_marks,
        passing_marks: payload.passing_marks,
        questions,
        now: primitive_now_utc(),
    };

    schemes::create(state.db(), &params)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to create marking scheme"))?;

    let scheme = schemes::find_by_id(state.db(), &params.id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load marking scheme"))?
        .ok_or_else(|| ApiError::Internal("Marking scheme vanished after insert".to_string()))?;

    Ok(Json(SchemeResponse::from_model(scheme)))
}

async fn list_schemes(
    State(state): State<AppState>,
) -> Result<Json<Vec<SchemeResponse>>, ApiError> {
    let schemes = schemes::list(state.db())
        .await
        .map_err(|err| ApiError::internal(err, "Failed to list marking schemes"))?;

    Ok(Json(schemes.into_iter().map(SchemeResponse::from_model).collect()))
}

async fn get_scheme(
    State(state): State<AppState>,
    Path(scheme_id): Path<String>,
) -> Result<Json<SchemeResponse>, ApiError> {
    let scheme = schemes::find_by_id(state.db(), &scheme_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load marking scheme"))?
        .ok_or_else(|| ApiError::NotFound(format!("Marking scheme {scheme_id} not found")))?;

    Ok(Json(SchemeResponse::from_model(scheme)))
}
