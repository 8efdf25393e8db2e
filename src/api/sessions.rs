use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories::{evaluations, schemes, scripts, sessions};
use crate::schemas::script::ScriptResponse;
use crate::schemas::session::{
    EvaluationResponse, SessionCreate, SessionProgressResponse, SessionResponse,
    SessionResultsResponse, StageCount,
};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session).get(list_sessions))
        .route("/:session_id", get(get_session))
        .route("/:session_id/scripts", get(session_scripts))
        .route("/:session_id/progress", get(session_progress))
        .route("/:session_id/results", get(session_results))
}

async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<SessionCreate>,
) -> Result<Json<SessionResponse>, ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    schemes::find_by_id(state.db(), &payload.scheme_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load marking scheme"))?
        .ok_or_else(|| {
            ApiError::BadRequest(format!("Marking scheme {} not found", payload.scheme_id))
        })?;

    let id = Uuid::new_v4().to_string();
    sessions::create(state.db(), &id, &payload.name, &payload.scheme_id, primitive_now_utc())
        .await
        .map_err(|err| ApiError::internal(err, "Failed to create exam session"))?;

    let session = sessions::find_by_id(state.db(), &id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load exam session"))?
        .ok_or_else(|| ApiError::Internal("Exam session vanished after insert".to_string()))?;

    Ok(Json(SessionResponse::from_model(session)))
}

async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let sessions = sessions::list(state.db())
        .await
        .map_err(|err| ApiError::internal(err, "Failed to list exam sessions"))?;

    Ok(Json(sessions.into_iter().map(SessionResponse::from_model).collect()))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = load_session(&state, &session_id).await?;
    Ok(Json(SessionResponse::from_model(session)))
}

async fn session_scripts(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<ScriptResponse>>, ApiError> {
    load_session(&state, &session_id).await?;

    let scripts = scripts::list_by_session(state.db(), &session_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to list session scripts"))?;

    Ok(Json(scripts.into_iter().map(ScriptResponse::from_model).collect()))
}

async fn session_progress(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionProgressResponse>, ApiError> {
    let session = load_session(&state, &session_id).await?;

    let stages = sessions::stage_counts(state.db(), &session_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load session stage counts"))?
        .into_iter()
        .map(|(stage, status, count)| StageCount { stage, status, count })
        .collect();

    Ok(Json(SessionProgressResponse {
        session: SessionResponse::from_model(session),
        stages,
    }))
}

async fn session_results(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResultsResponse>, ApiError> {
    let session = load_session(&state, &session_id).await?;

    let evaluations = evaluations::list_by_session(state.db(), &session_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load session results"))?
        .into_iter()
        .map(EvaluationResponse::from_result)
        .collect();

    Ok(Json(SessionResultsResponse {
        session: SessionResponse::from_model(session),
        evaluations,
    }))
}

async fn load_session(
    state: &AppState,
    session_id: &str,
) -> Result<crate::db::models::ExamSession, ApiError> {
    sessions::find_by_id(state.db(), session_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load exam session"))?
        .ok_or_else(|| ApiError::NotFound(format!("Exam session {session_id} not found")))
}
