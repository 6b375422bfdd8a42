//! Survey question endpoints.

use axum::{Json, Router, extract::State, routing::get};
use tally_common::AppResult;
use tally_db::model::Question;

use crate::middleware::AppState;

/// Questions in display order.
async fn list_questions(State(state): State<AppState>) -> AppResult<Json<Vec<Question>>> {
    Ok(Json(state.question_service.list().await?))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_questions))
}
