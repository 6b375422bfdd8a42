//! Debounced aggregation engine.
//!
//! Every vote event runs [`decide`] against the durable [`ControlState`]:
//!
//! - the last recount is at least one window old: claim it and recount now;
//! - otherwise, if nothing is pending: schedule one deferred recount at
//!   `now + window` and arm a single timer for it;
//! - otherwise: do nothing, the pending recount will cover this vote.
//!
//! Each transition is a compare-and-swap on the control version, so racing
//! events cannot both win the same transition. The version claimed for a
//! recount becomes the generation of the snapshot it writes, and stores
//! refuse to replace a snapshot with an older generation.

use std::sync::Arc;
use std::time::Duration;

use tally_common::config::AggregationConfig;
use tally_common::{AppError, AppResult, Metrics};
use tally_db::model::{AggregateSnapshot, ControlState, Phase};
use tally_db::SurveyStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::results::SnapshotHub;
use super::snapshot_publisher::SnapshotPublisher;
use super::timeout::bounded;
use crate::clock::Clock;

/// Notification that a response was persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteEvent {
    pub response_id: String,
    pub received_at_ms: i64,
}

impl VoteEvent {
    /// Milliseconds the event waited between ingest and `now_ms`.
    #[must_use]
    pub const fn queued_ms(&self, now_ms: i64) -> i64 {
        let waited = now_ms.saturating_sub(self.received_at_ms);
        if waited < 0 { 0 } else { waited }
    }
}

/// What a vote event should do given the current control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Recount now.
    Immediate,
    /// Schedule a deferred recount.
    Schedule { fire_at: i64 },
    /// A deferred recount is already pending.
    AlreadyPending { fire_at: i64 },
}

/// Pure debounce decision.
#[must_use]
pub const fn decide(state: &ControlState, now_ms: i64, window_ms: i64) -> Decision {
    if now_ms.saturating_sub(state.last_run_ms) >= window_ms {
        return Decision::Immediate;
    }
    match state.phase() {
        Phase::Idle => Decision::Schedule {
            fire_at: now_ms.saturating_add(window_ms),
        },
        Phase::Pending { fire_at } => Decision::AlreadyPending { fire_at },
    }
}

/// Result of a full recount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecountOutcome {
    /// The snapshot was stored and published.
    Written(Arc<AggregateSnapshot>),
    /// A snapshot of the same or a newer generation was already stored.
    Superseded { generation: i64 },
}

/// Result of handling one vote event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Recomputed(RecountOutcome),
    Scheduled { fire_at: i64 },
    AlreadyPending { fire_at: i64 },
    /// Every attempt lost its compare-and-swap. The winners' transitions
    /// happened after this vote was stored, so they cover it.
    Contended,
}

/// Result of a deferred recount firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Recomputed(RecountOutcome),
    /// The schedule was cleared or replaced before the timer fired.
    Stale,
}

/// What startup recovery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// A deferred recount was pending; its timer was re-armed.
    Rearmed { fire_at: i64 },
    /// Nothing was pending; a catch-up recount ran.
    Recounted(RecountOutcome),
}

/// Engine tuning.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub window_ms: i64,
    pub store_timeout: Duration,
    pub max_cas_retries: u32,
}

impl EngineSettings {
    /// Settings from the `aggregation` configuration section.
    #[must_use]
    pub fn from_config(config: &AggregationConfig) -> Self {
        Self {
            window_ms: i64::try_from(config.debounce_window().as_millis()).unwrap_or(i64::MAX),
            store_timeout: config.store_timeout(),
            max_cas_retries: config.max_cas_retries,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AggregationConfig::default())
    }
}

/// Aggregation engine.
pub struct AggregationEngine {
    store: Arc<dyn SurveyStore>,
    hub: SnapshotHub,
    publisher: Arc<dyn SnapshotPublisher>,
    metrics: Arc<Metrics>,
    clock: Clock,
    settings: EngineSettings,
}

impl AggregationEngine {
    /// Create a new aggregation engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn SurveyStore>,
        hub: SnapshotHub,
        publisher: Arc<dyn SnapshotPublisher>,
        metrics: Arc<Metrics>,
        clock: Clock,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            hub,
            publisher,
            metrics,
            clock,
            settings,
        }
    }

    /// Handle one vote event.
    pub async fn on_vote(self: &Arc<Self>) -> AppResult<VoteOutcome> {
        for _ in 0..=self.settings.max_cas_retries {
            let now = self.clock.now_ms();
            let state = self.load_control().await?;

            match decide(&state, now, self.settings.window_ms) {
                Decision::Immediate => {
                    let claimed = state.claimed(now);
                    if !self.swap(&state, &claimed).await? {
                        continue;
                    }
                    debug!(decision = "immediate", generation = claimed.version, "Recount claimed");
                    return self
                        .run_claimed(claimed, false)
                        .await
                        .map(VoteOutcome::Recomputed);
                }
                Decision::Schedule { fire_at } => {
                    let scheduled = state.scheduled(fire_at);
                    if !self.swap(&state, &scheduled).await? {
                        continue;
                    }
                    debug!(decision = "schedule", fire_at, "Deferred recount scheduled");
                    self.arm_timer(fire_at);
                    return Ok(VoteOutcome::Scheduled { fire_at });
                }
                Decision::AlreadyPending { fire_at } => {
                    return Ok(VoteOutcome::AlreadyPending { fire_at });
                }
            }
        }

        debug!("Control state contended; vote covered by a concurrent transition");
        Ok(VoteOutcome::Contended)
    }

    /// Run the deferred recount scheduled for `fire_at`, if it is still the
    /// authoritative schedule.
    pub async fn fire_deferred(self: &Arc<Self>, fire_at: i64) -> AppResult<FireOutcome> {
        for _ in 0..=self.settings.max_cas_retries {
            let state = self.load_control().await?;

            match state.phase() {
                Phase::Pending { fire_at: current } if current == fire_at => {
                    let claimed = state.claimed(self.clock.now_ms());
                    if !self.swap(&state, &claimed).await? {
                        continue;
                    }
                    debug!(decision = "deferred", fire_at, generation = claimed.version, "Recount claimed");
                    return self
                        .run_claimed(claimed, true)
                        .await
                        .map(FireOutcome::Recomputed);
                }
                _ => break,
            }
        }

        self.metrics.record_stale_timer();
        debug!(fire_at, "Deferred recount no longer authoritative");
        Ok(FireOutcome::Stale)
    }

    /// Claim and run a recount regardless of the debounce window.
    pub async fn recompute_now(self: &Arc<Self>) -> AppResult<RecountOutcome> {
        for _ in 0..=self.settings.max_cas_retries {
            let state = self.load_control().await?;
            let claimed = state.claimed(self.clock.now_ms());
            if self.swap(&state, &claimed).await? {
                return self.run_claimed(claimed, false).await;
            }
        }
        Err(AppError::Storage(
            "control state changed on every attempt".to_string(),
        ))
    }

    /// Re-derive the schedule from durable state after a restart.
    ///
    /// A pending recount gets its timer back, firing at once if overdue.
    /// Otherwise one catch-up recount picks up anything a crashed instance
    /// stored but never aggregated.
    pub async fn recover(self: &Arc<Self>) -> AppResult<Recovery> {
        let state = self.load_control().await?;

        if let Phase::Pending { fire_at } = state.phase() {
            info!(fire_at, "Re-arming pending deferred recount");
            self.arm_timer(fire_at);
            return Ok(Recovery::Rearmed { fire_at });
        }

        let outcome = self.recompute_now().await?;
        info!("Catch-up recount finished");
        Ok(Recovery::Recounted(outcome))
    }

    /// Fire a pending recount that is overdue by more than one window.
    ///
    /// Covers schedules whose owning instance died before its timer fired.
    pub async fn sweep(self: &Arc<Self>) -> AppResult<Option<FireOutcome>> {
        let state = self.load_control().await?;
        match state.phase() {
            Phase::Pending { fire_at }
                if self.clock.now_ms() - fire_at > self.settings.window_ms =>
            {
                warn!(fire_at, "Found overdue deferred recount");
                self.fire_deferred(fire_at).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Consume vote events, handling each in its own task.
    pub fn spawn_listener(self: &Arc<Self>, mut events: mpsc::Receiver<VoteEvent>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let queued_ms = event.queued_ms(engine.clock.now_ms());
                    match engine.on_vote().await {
                        Ok(outcome) => {
                            debug!(response_id = %event.response_id, queued_ms, ?outcome, "Vote event handled");
                        }
                        Err(e) => {
                            warn!(response_id = %event.response_id, error = %e, "Aggregation failed; a later vote will retry");
                        }
                    }
                });
            }
            info!("Vote event channel closed");
        })
    }

    async fn load_control(&self) -> AppResult<ControlState> {
        bounded(self.settings.store_timeout, self.store.load_control()).await
    }

    async fn swap(&self, current: &ControlState, next: &ControlState) -> AppResult<bool> {
        let swapped = bounded(
            self.settings.store_timeout,
            self.store.compare_and_swap_control(current.version, next),
        )
        .await?;
        if !swapped {
            self.metrics.record_cas_conflict();
        }
        Ok(swapped)
    }

    fn arm_timer(self: &Arc<Self>, fire_at: i64) {
        let engine = Arc::clone(self);
        let deadline = self.clock.instant_at(fire_at);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Err(e) = engine.fire_deferred(fire_at).await {
                warn!(fire_at, error = %e, "Deferred recount failed");
            }
        });
    }

    async fn run_claimed(
        self: &Arc<Self>,
        claimed: ControlState,
        deferred: bool,
    ) -> AppResult<RecountOutcome> {
        match self.recount(claimed.version, deferred).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.metrics.record_recompute_failure();
                warn!(generation = claimed.version, error = %e, "Recount failed");
                self.hand_off(claimed).await;
                Err(e)
            }
        }
    }

    /// After a failed recount, leave a pending schedule behind so the
    /// trailing pass is not lost. Skipped if the state moved on meanwhile.
    async fn hand_off(self: &Arc<Self>, claimed: ControlState) {
        let fire_at = self.clock.now_ms().saturating_add(self.settings.window_ms);
        let retry = claimed.scheduled(fire_at);
        match self.swap(&claimed, &retry).await {
            Ok(true) => {
                debug!(fire_at, "Failed recount handed to a deferred retry");
                self.arm_timer(fire_at);
            }
            Ok(false) => debug!("Control state moved on; retry left to its owner"),
            Err(e) => error!(error = %e, "Could not schedule recount retry"),
        }
    }

    async fn recount(&self, generation: i64, deferred: bool) -> AppResult<RecountOutcome> {
        let limit = self.settings.store_timeout;
        let questions = bounded(limit, self.store.list_questions()).await?;
        let totals = bounded(limit, self.store.read_counters()).await?;

        let mut snapshot = AggregateSnapshot::empty(&questions, generation, self.clock.now_ms());
        snapshot.total_responses = totals.total_responses;
        snapshot.counters.extend(totals.counters);

        if !bounded(limit, self.store.write_snapshot(&snapshot)).await? {
            self.metrics.record_snapshot_superseded();
            debug!(generation, "Snapshot superseded by a newer recount");
            return Ok(RecountOutcome::Superseded { generation });
        }

        self.metrics.record_recompute(deferred);
        info!(
            generation,
            total_responses = snapshot.total_responses,
            deferred,
            "Snapshot written"
        );

        let snapshot = Arc::new(snapshot);
        self.hub.publish(Arc::clone(&snapshot));
        if let Err(e) = self.publisher.publish_snapshot(&snapshot).await {
            warn!(generation, error = %e, "Failed to announce snapshot");
        }
        Ok(RecountOutcome::Written(snapshot))
    }
}
