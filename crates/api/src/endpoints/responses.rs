//! Vote submission endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde_json::Value;
use tally_common::AppResult;

use crate::{extractors::JsonPayload, middleware::AppState, response::MessageResponse};

/// Submit one survey response: `{ "answers": { "q1": [0, 2] }, "timestamp": "..." }`.
async fn submit(
    State(state): State<AppState>,
    JsonPayload(payload): JsonPayload<Value>,
) -> AppResult<Json<MessageResponse>> {
    let id = state.vote_service.submit(&payload).await?;
    Ok(Json(MessageResponse {
        message: "Response submitted successfully",
        id: Some(id),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/responses", post(submit))
        .route("/submit", post(submit))
}
