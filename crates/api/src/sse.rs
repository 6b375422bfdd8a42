//! Server-Sent Events for live results.
//!
//! Each connection receives the current snapshot on connect and every newer
//! one after that, as `snapshot` events carrying the flat counter map.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use tally_common::Metrics;
use tally_db::model::AggregateSnapshot;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

use crate::middleware::AppState;

/// Name of the SSE event carrying a snapshot.
pub const SNAPSHOT_EVENT: &str = "snapshot";

/// Keeps the active-connection gauge in step with live streams.
struct ConnectionGuard(Arc<Metrics>);

impl ConnectionGuard {
    fn open(metrics: Arc<Metrics>) -> Self {
        metrics.sse_connected();
        Self(metrics)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.sse_disconnected();
        debug!("SSE results stream closed");
    }
}

/// Render a snapshot as an SSE event.
#[must_use]
pub fn snapshot_event(snapshot: &AggregateSnapshot) -> Event {
    Event::default()
        .event(SNAPSHOT_EVENT)
        .id(snapshot.generation.to_string())
        .json_data(snapshot)
        .unwrap_or_else(|_| Event::default().event(SNAPSHOT_EVENT).data("{}"))
}

/// Live results stream.
pub async fn results_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Warm the hub so a fresh process still sends the stored snapshot first.
    if let Err(e) = state.results_service.snapshot().await {
        warn!(error = %e, "No initial snapshot for SSE client");
    }

    let guard = ConnectionGuard::open(Arc::clone(&state.metrics));
    let stream = WatchStream::new(state.results_service.subscribe()).filter_map(move |latest| {
        let _connection = &guard;
        latest.map(|snapshot| Ok(snapshot_event(&snapshot)))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}
