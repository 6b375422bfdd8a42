//! HTTP API layer for tally.
//!
//! - **Endpoints**: vote submission, questions, results, admin
//! - **Extractors**: JSON bodies that fail as validation errors
//! - **Middleware**: application state and cache headers
//! - **Streaming**: Server-Sent Events for live results
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;
pub mod sse;

pub use endpoints::router;
pub use middleware::{AppState, Pipeline};
