//! Aggregate results endpoints.

use axum::{Json, Router, extract::State, middleware, routing::get};
use tally_common::AppResult;
use tally_core::QuestionResult;
use tally_db::model::AggregateSnapshot;

use crate::{
    middleware::{AppState, no_store},
    response::ApiResponse,
    sse,
};

/// Flat snapshot: `{ "totalResponses": n, "q1c1": n, ... }`.
async fn snapshot(State(state): State<AppState>) -> AppResult<Json<AggregateSnapshot>> {
    let snapshot = state.results_service.snapshot().await?;
    Ok(Json((*snapshot).clone()))
}

/// Per-question results with percentages.
async fn question_results(
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<QuestionResult>>> {
    Ok(ApiResponse::ok(state.results_service.question_results().await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(snapshot))
        .route("/questions", get(question_results))
        .route("/stream", get(sse::results_stream))
        .layer(middleware::from_fn(no_store))
}
