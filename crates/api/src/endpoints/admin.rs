//! Admin endpoints: question editing, response count and reset.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use serde::Serialize;
use tally_common::AppResult;
use tally_core::UpdateQuestionInput;
use tally_db::model::Question;
use tracing::info;

use crate::{extractors::JsonPayload, middleware::AppState, response::SuccessResponse};

#[derive(Serialize)]
pub struct QuestionsResponse {
    pub questions: Vec<Question>,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Questions for the editor; seeds the defaults on first use.
async fn list_questions(State(state): State<AppState>) -> AppResult<Json<QuestionsResponse>> {
    let questions = state.question_service.list_or_seed().await?;
    Ok(Json(QuestionsResponse { questions }))
}

async fn update_question(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonPayload(input): JsonPayload<UpdateQuestionInput>,
) -> AppResult<Json<Question>> {
    let question = state.question_service.update(&id, input).await?;
    info!(question_id = %question.id, "Question updated");
    Ok(Json(question))
}

async fn count(State(state): State<AppState>) -> AppResult<Json<CountResponse>> {
    let count = state.admin_service.response_count().await?;
    Ok(Json(CountResponse { count }))
}

async fn reset(State(state): State<AppState>) -> AppResult<Json<SuccessResponse>> {
    state.admin_service.reset().await?;
    Ok(SuccessResponse::ok())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/questions", get(list_questions))
        .route("/questions/{id}", put(update_question))
        .route("/count", get(count))
        .route("/reset", post(reset))
}
