//! API endpoints.

mod admin;
mod metrics;
mod questions;
mod responses;
mod results;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router. Mounted under `/api` by the server.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(responses::router())
        .nest("/questions", questions::router())
        .nest("/results", results::router())
        .nest("/admin", admin::router())
        .nest("/metrics", metrics::router())
}
