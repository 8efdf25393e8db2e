use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::{ReviewPriority, ReviewStatus};
use crate::repositories::reviews;
use crate::schemas::review::{ReviewResolve, ReviewResponse, ReviewStatsResponse};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reviews))
        .route("/stats", get(review_stats))
        .route("/:review_id", get(get_review))
        .route("/:review_id/resolve", post(resolve_review))
}

#[derive(Debug, Deserialize)]
struct ReviewListQuery {
    status: Option<ReviewStatus>,
    priority: Option<ReviewPriority>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list_reviews(
    State(state): State<AppState>,
    Query(query): Query<ReviewListQuery>,
) -> Result<Json<Vec<ReviewResponse>>, ApiError> {
    let filter = reviews::ReviewFilter {
        status: query.status,
        priority: query.priority,
        limit: query.limit,
        offset: query.offset,
    };

    let entries = reviews::list(state.db(), &filter)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to list review entries"))?;

    Ok(Json(entries.into_iter().map(ReviewResponse::from_model).collect()))
}

async fn review_stats(
    State(state): State<AppState>,
) -> Result<Json<ReviewStatsResponse>, ApiError> {
    let pending = reviews::pending_count(state.db())
        .await
        .map_err(|err| ApiError::internal(err, "Failed to count pending reviews"))?;

    Ok(Json(ReviewStatsResponse { pending }))
}

async fn get_review(
    State(state): State<AppState>,
    Path(review_id): Path<String>,
) -> Result<Json<ReviewResponse>, ApiError> {
    let entry = reviews::find_by_id(state.db(), &review_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load review entry"))?
        .ok_or_else(|| ApiError::NotFound(format!("Review entry {review_id} not found")))?;

    Ok(Json(ReviewResponse::from_model(entry)))
}

async fn resolve_review(
    State(state): State<AppState>,
    Path(review_id): Path<String>,
    Json(payload): Json<ReviewResolve>,
) -> Result<Json<ReviewResponse>, ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let resolved = reviews::resolve(
        state.db(),
        &review_id,
        payload.manual_score,
        &payload.reviewer_notes,
        primitive_now_utc(),
    )
    .await
    .map_err(|err| ApiError::internal(err, "Failed to resolve review entry"))?;

    match resolved {
        Some(entry) => Ok(Json(ReviewResponse::from_model(entry))),
        None => {
            // Distinguish a missing entry from one a concurrent reviewer beat
            // us to.
            let existing = reviews::find_by_id(state.db(), &review_id)
                .await
                .map_err(|err| ApiError::internal(err, "Failed to load review entry"))?;
            match existing {
                Some(_) => Err(ApiError::Conflict(format!(
                    "Review entry {review_id} is already resolved"
                ))),
                None => Err(ApiError::NotFound(format!("Review entry {review_id} not found"))),
            }
        }
    }
}
