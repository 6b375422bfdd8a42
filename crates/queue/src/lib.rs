//! Background plumbing for tally.
//!
//! - **Pub/Sub**: Redis fan-out of aggregate snapshots across instances
//! - **Scheduler**: periodic sweep for deferred recounts whose owner died

pub mod pubsub;
pub mod scheduler;

pub use pubsub::{channels as pubsub_channels, PubSubBridge, PubSubEvent, RedisPubSub};
pub use scheduler::{run_scheduler, AggregationJobs, JobExecutor, SchedulerConfig};
