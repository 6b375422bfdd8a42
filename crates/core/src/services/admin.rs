//! Admin service: response count and full reset.

use std::sync::Arc;
use std::time::Duration;

use tally_common::AppResult;
use tally_db::model::AggregateSnapshot;
use tally_db::SurveyStore;
use tracing::{info, warn};

use super::results::SnapshotHub;
use super::snapshot_publisher::SnapshotPublisher;
use super::timeout::bounded;
use crate::clock::Clock;

/// Admin service.
#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn SurveyStore>,
    hub: SnapshotHub,
    publisher: Arc<dyn SnapshotPublisher>,
    clock: Clock,
    store_timeout: Duration,
}

impl AdminService {
    /// Create a new admin service.
    #[must_use]
    pub fn new(
        store: Arc<dyn SurveyStore>,
        hub: SnapshotHub,
        publisher: Arc<dyn SnapshotPublisher>,
        clock: Clock,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            hub,
            publisher,
            clock,
            store_timeout,
        }
    }

    /// Number of stored responses.
    pub async fn response_count(&self) -> AppResult<u64> {
        bounded(self.store_timeout, self.store.count_responses()).await
    }

    /// Delete every response and counter and zero the snapshot.
    ///
    /// Questions survive. Safe to repeat: each call produces a fresh empty
    /// snapshot with a higher generation.
    pub async fn reset(&self) -> AppResult<Arc<AggregateSnapshot>> {
        let empty = Arc::new(
            bounded(self.store_timeout, self.store.reset(self.clock.now_ms())).await?,
        );
        info!(generation = empty.generation, "Survey data reset");

        self.hub.publish(Arc::clone(&empty));
        if let Err(e) = self.publisher.publish_snapshot(&empty).await {
            warn!(error = %e, "Failed to announce reset snapshot");
        }
        Ok(empty)
    }
}
