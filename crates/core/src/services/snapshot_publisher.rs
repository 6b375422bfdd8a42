//! Snapshot publisher abstraction.
//!
//! The engine announces every snapshot it writes so other instances can
//! refresh their subscribers. The Redis implementation lives in the queue
//! crate.

use async_trait::async_trait;
use tally_common::AppResult;
use tally_db::model::AggregateSnapshot;

/// Publishes freshly written snapshots to other instances.
#[async_trait]
pub trait SnapshotPublisher: Send + Sync {
    /// Announce a snapshot that was just written to the store.
    async fn publish_snapshot(&self, snapshot: &AggregateSnapshot) -> AppResult<()>;
}

/// Publisher for single-instance deployments.
#[derive(Clone, Default)]
pub struct NoOpSnapshotPublisher;

#[async_trait]
impl SnapshotPublisher for NoOpSnapshotPublisher {
    async fn publish_snapshot(&self, _snapshot: &AggregateSnapshot) -> AppResult<()> {
        Ok(())
    }
}
