//! Redis Pub/Sub for cross-instance snapshot distribution.
//!
//! Every instance publishes the snapshots it writes and feeds the ones it
//! receives into its local [`SnapshotHub`](tally_core::SnapshotHub), so SSE
//! clients see updates no matter which instance ran the recount.

#![allow(missing_docs)]

use std::sync::Arc;

use async_trait::async_trait;
use fred::clients::{Client, SubscriberClient};
use fred::error::{Error as RedisError, ErrorKind as RedisErrorKind};
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use serde::{Deserialize, Serialize};
use tally_common::{AppError, AppResult};
use tally_core::services::SnapshotPublisher;
use tally_db::model::AggregateSnapshot;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Pub/Sub channel names.
pub mod channels {
    /// Suffix of the snapshot channel.
    pub const SNAPSHOT: &str = "snapshot";

    /// Snapshot channel for a key prefix, e.g. `tally:snapshot`.
    #[must_use]
    pub fn snapshot(prefix: &str) -> String {
        format!("{prefix}:{SNAPSHOT}")
    }
}

/// Pub/Sub event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PubSubEvent {
    /// A snapshot was written to the store.
    SnapshotUpdated {
        generation: i64,
        computed_at_ms: i64,
        snapshot: AggregateSnapshot,
    },
}

impl PubSubEvent {
    /// Event announcing `snapshot`.
    #[must_use]
    pub fn snapshot_updated(snapshot: &AggregateSnapshot) -> Self {
        Self::SnapshotUpdated {
            generation: snapshot.generation,
            computed_at_ms: snapshot.computed_at_ms,
            snapshot: snapshot.clone(),
        }
    }

    /// The announced snapshot with its ordering fields restored.
    #[must_use]
    pub fn into_snapshot(self) -> AggregateSnapshot {
        match self {
            Self::SnapshotUpdated {
                generation,
                computed_at_ms,
                snapshot,
            } => AggregateSnapshot {
                generation,
                computed_at_ms,
                ..snapshot
            },
        }
    }
}

/// Redis Pub/Sub manager for snapshot distribution.
#[derive(Clone)]
pub struct RedisPubSub {
    publisher: Client,
    subscriber: SubscriberClient,
    channel: String,
    /// Local broadcast channel for events received from Redis.
    local_tx: broadcast::Sender<PubSubEvent>,
}

impl RedisPubSub {
    /// Connect both clients. Channel names are namespaced by `prefix`.
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;

        let publisher = Client::new(config.clone(), None, None, None);
        publisher.init().await?;

        let subscriber = SubscriberClient::new(config, None, None, None);
        subscriber.init().await?;

        let (local_tx, _) = broadcast::channel(256);

        info!(prefix, "Redis Pub/Sub initialized");

        Ok(Self {
            publisher,
            subscriber,
            channel: channels::snapshot(prefix),
            local_tx,
        })
    }

    /// Subscribe to the snapshot channel and start the receive loop.
    pub async fn start(&self) -> Result<(), RedisError> {
        self.subscriber.subscribe(self.channel.as_str()).await?;
        info!(channel = %self.channel, "Subscribed to Redis Pub/Sub channel");

        let local_tx = self.local_tx.clone();
        let mut message_stream = self.subscriber.message_rx();

        tokio::spawn(async move {
            while let Ok(message) = message_stream.recv().await {
                let Some(payload) = message.value.as_string() else {
                    continue;
                };
                match serde_json::from_str::<PubSubEvent>(&payload) {
                    Ok(event) => {
                        debug!(?event, "Received Pub/Sub event");
                        if local_tx.send(event).is_err() {
                            debug!("No local subscribers for Pub/Sub event");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to parse Pub/Sub message"),
                }
            }
            info!("Pub/Sub message stream ended");
        });

        Ok(())
    }

    /// Publish an event on the snapshot channel.
    pub async fn publish(&self, event: &PubSubEvent) -> Result<(), RedisError> {
        let payload = serde_json::to_string(event).map_err(|e| {
            RedisError::new(
                RedisErrorKind::InvalidArgument,
                format!("Serialization error: {e}"),
            )
        })?;
        let _: () = self.publisher.publish(self.channel.as_str(), payload).await?;
        debug!(channel = %self.channel, "Published Pub/Sub event");
        Ok(())
    }

    /// Get a receiver for events received from Redis.
    #[must_use]
    pub fn subscribe_local(&self) -> broadcast::Receiver<PubSubEvent> {
        self.local_tx.subscribe()
    }

    /// Shutdown the Pub/Sub manager.
    pub async fn shutdown(&self) -> Result<(), RedisError> {
        self.subscriber.quit().await?;
        self.publisher.quit().await?;
        info!("Redis Pub/Sub shutdown");
        Ok(())
    }
}

#[async_trait]
impl SnapshotPublisher for RedisPubSub {
    async fn publish_snapshot(&self, snapshot: &AggregateSnapshot) -> AppResult<()> {
        self.publish(&PubSubEvent::snapshot_updated(snapshot))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }
}

/// Forwards events received from Redis to a local consumer.
pub struct PubSubBridge {
    pubsub: Arc<RedisPubSub>,
}

impl PubSubBridge {
    /// Create a new bridge.
    #[must_use]
    pub const fn new(pubsub: Arc<RedisPubSub>) -> Self {
        Self { pubsub }
    }

    /// Start forwarding. `on_event` runs on the bridge task for every event.
    pub fn start<F>(&self, on_event: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(PubSubEvent) + Send + Sync + 'static,
    {
        let mut rx = self.pubsub.subscribe_local();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => on_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Only the newest snapshot matters; the next one catches up.
                        warn!(skipped = n, "Pub/Sub bridge lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Pub/Sub bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot() -> AggregateSnapshot {
        AggregateSnapshot {
            total_responses: 3,
            counters: BTreeMap::from([("q1c1".to_string(), 2), ("q1c2".to_string(), 1)]),
            generation: 12,
            computed_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(channels::snapshot("tally"), "tally:snapshot");
        assert_eq!(channels::snapshot("staging"), "staging:snapshot");
    }

    #[test]
    fn test_snapshot_event_wire_format() {
        let event = PubSubEvent::snapshot_updated(&snapshot());

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "snapshotUpdated");
        assert_eq!(json["generation"], 12);
        assert_eq!(json["computedAtMs"], 1_700_000_000_000_i64);
        assert_eq!(json["snapshot"]["totalResponses"], 3);
        assert_eq!(json["snapshot"]["q1c1"], 2);
    }

    #[test]
    fn test_received_event_restores_generation() {
        let json = serde_json::to_string(&PubSubEvent::snapshot_updated(&snapshot())).unwrap();

        let parsed: PubSubEvent = serde_json::from_str(&json).unwrap();
        let restored = parsed.into_snapshot();

        assert_eq!(restored, snapshot());
    }
}
