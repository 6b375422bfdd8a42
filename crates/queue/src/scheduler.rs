//! Periodic maintenance jobs.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tally_core::{AggregationEngine, FireOutcome};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to look for overdue deferred recounts (default: 5 seconds).
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Job executor trait for scheduled jobs.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Fire a deferred recount whose owner never did. Returns whether one ran.
    async fn sweep_overdue_recounts(&self)
        -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

/// Executes scheduled jobs against the aggregation engine.
pub struct AggregationJobs {
    engine: Arc<AggregationEngine>,
}

impl AggregationJobs {
    /// Create a new executor.
    #[must_use]
    pub const fn new(engine: Arc<AggregationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl JobExecutor for AggregationJobs {
    async fn sweep_overdue_recounts(
        &self,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let fired = self.engine.sweep().await?;
        Ok(matches!(fired, Some(FireOutcome::Recomputed(_))))
    }
}

/// Spawn the scheduler loops. Abort the returned handle to stop them.
pub fn run_scheduler<E: JobExecutor + 'static>(
    config: SchedulerConfig,
    executor: Arc<E>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(config.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match executor.sweep_overdue_recounts().await {
                Ok(true) => tracing::info!("Recovered overdue deferred recount"),
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "Overdue recount sweep failed"),
            }
        }
    })
}
