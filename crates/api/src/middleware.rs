//! API middleware.

#![allow(missing_docs)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};
use tally_common::Metrics;
use tally_common::config::AggregationConfig;
use tally_core::{
    AdminService, AggregationEngine, Clock, EngineSettings, QuestionService, ResultsService,
    SnapshotHub, SnapshotPublisher, VoteEvent, VoteService,
};
use tally_db::SurveyStore;
use tokio::sync::mpsc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub vote_service: VoteService,
    pub question_service: QuestionService,
    pub results_service: ResultsService,
    pub admin_service: AdminService,
    pub metrics: Arc<Metrics>,
}

/// Everything the server wires around one store.
///
/// The engine does nothing until `events` is handed to
/// [`AggregationEngine::spawn_listener`].
pub struct Pipeline {
    pub state: AppState,
    pub engine: Arc<AggregationEngine>,
    pub events: mpsc::Receiver<VoteEvent>,
}

impl AppState {
    /// Build the services and the aggregation engine over `store`.
    #[must_use]
    pub fn pipeline(
        store: Arc<dyn SurveyStore>,
        hub: SnapshotHub,
        publisher: Arc<dyn SnapshotPublisher>,
        metrics: Arc<Metrics>,
        clock: Clock,
        config: &AggregationConfig,
    ) -> Pipeline {
        let store_timeout = config.store_timeout();
        let (tx, events) = mpsc::channel(config.event_buffer.max(1));

        let engine = Arc::new(AggregationEngine::new(
            Arc::clone(&store),
            hub.clone(),
            Arc::clone(&publisher),
            Arc::clone(&metrics),
            clock,
            EngineSettings::from_config(config),
        ));

        let state = Self {
            vote_service: VoteService::new(
                Arc::clone(&store),
                tx,
                Arc::clone(&metrics),
                clock,
                store_timeout,
            ),
            question_service: QuestionService::new(Arc::clone(&store), store_timeout),
            results_service: ResultsService::new(Arc::clone(&store), hub.clone(), store_timeout),
            admin_service: AdminService::new(store, hub, publisher, clock, store_timeout),
            metrics,
        };

        Pipeline {
            state,
            engine,
            events,
        }
    }
}

/// Results change every debounce window; never let a proxy cache them.
pub async fn no_store(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
