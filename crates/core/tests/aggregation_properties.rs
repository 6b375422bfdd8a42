//! End-to-end properties of the ingest -> aggregation -> reader pipeline.
//!
//! All tests run on a paused tokio clock, so debounce timing is exact.

#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use tally_common::{AppResult, Metrics};
use tally_core::services::question::default_questions;
use tally_core::{
    AdminService, AggregationEngine, Clock, EngineSettings, NoOpSnapshotPublisher,
    RecountOutcome, Recovery, ResultsService, SnapshotHub, VoteEvent, VoteOutcome, VoteService,
};
use tally_db::model::{
    AggregateSnapshot, ControlState, CounterTotals, NewResponse, Phase, Question,
};
use tally_db::{MemorySurveyStore, SurveyStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const BASE_MS: i64 = 1_700_000_000_000;
const WINDOW_MS: i64 = 1_000;
const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    store: Arc<MemorySurveyStore>,
    engine: Arc<AggregationEngine>,
    votes: VoteService,
    results: ResultsService,
    admin: AdminService,
    hub: SnapshotHub,
    metrics: Arc<Metrics>,
    events: Option<mpsc::Receiver<VoteEvent>>,
    _listener: Option<JoinHandle<()>>,
}

impl Harness {
    /// Pipeline whose vote events are consumed by the engine's listener.
    fn listening() -> Self {
        let mut harness = Self::manual(Arc::new(MemorySurveyStore::with_questions(
            default_questions(),
        )));
        let events = harness.events.take().unwrap();
        harness._listener = Some(harness.engine.spawn_listener(events));
        harness
    }

    /// Pipeline where the test calls the engine itself.
    fn manual(store: Arc<MemorySurveyStore>) -> Self {
        let clock = Clock::starting_at(BASE_MS);
        let hub = SnapshotHub::new();
        let metrics = Arc::new(Metrics::new());
        let publisher = Arc::new(NoOpSnapshotPublisher);
        let (tx, rx) = mpsc::channel(1024);

        let engine = Arc::new(AggregationEngine::new(
            store.clone(),
            hub.clone(),
            publisher.clone(),
            Arc::clone(&metrics),
            clock,
            EngineSettings {
                window_ms: WINDOW_MS,
                store_timeout: TIMEOUT,
                max_cas_retries: 8,
            },
        ));

        Self {
            votes: VoteService::new(store.clone(), tx, Arc::clone(&metrics), clock, TIMEOUT),
            results: ResultsService::new(store.clone(), hub.clone(), TIMEOUT),
            admin: AdminService::new(store.clone(), hub.clone(), publisher, clock, TIMEOUT),
            store,
            engine,
            hub,
            metrics,
            events: Some(rx),
            _listener: None,
        }
    }

    async fn vote(&self, q1: &[u32]) {
        self.votes.submit(&payload(q1)).await.unwrap();
    }

    /// Let every pending timer fire.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(3 * WINDOW_MS as u64)).await;
    }
}

fn payload(q1: &[u32]) -> Value {
    json!({ "answers": { "q1": q1 }, "timestamp": "2025-03-01T12:00:00Z" })
}

/// Sleep until `offset_ms` after `start` on the paused clock.
async fn advance_to(start: tokio::time::Instant, offset_ms: u64) {
    tokio::time::sleep_until(start + Duration::from_millis(offset_ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_converges_to_true_totals() {
    let h = Harness::listening();

    h.vote(&[0]).await;
    h.vote(&[0]).await;
    h.vote(&[1]).await;
    h.settle().await;

    let snapshot = h.results.snapshot().await.unwrap();
    assert_eq!(snapshot.count("q1c1"), 2);
    assert_eq!(snapshot.count("q1c2"), 1);
    assert_eq!(snapshot.count("q1c3"), 0);
    assert_eq!(snapshot.total_responses, 3);
    assert_eq!(h.hub.current().unwrap().total_responses, 3);

    let body = serde_json::to_value(&*snapshot).unwrap();
    assert_eq!(body["totalResponses"], 3);
    assert_eq!(body["q1c1"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_recount_is_idempotent() {
    let h = Harness::listening();
    h.vote(&[0, 2]).await;
    h.vote(&[4]).await;
    h.settle().await;

    let RecountOutcome::Written(first) = h.engine.recompute_now().await.unwrap() else {
        panic!("first recount was not written");
    };
    let RecountOutcome::Written(second) = h.engine.recompute_now().await.unwrap() else {
        panic!("second recount was not written");
    };

    assert_eq!(first.counters, second.counters);
    assert_eq!(first.total_responses, second.total_responses);
    assert!(second.generation > first.generation);
}

#[tokio::test(start_paused = true)]
async fn test_burst_within_window_schedules_one_deferred_recount() {
    let start = tokio::time::Instant::now();
    let h = Harness::manual(Arc::new(MemorySurveyStore::with_questions(
        default_questions(),
    )));

    let mut outcomes = Vec::new();
    for (offset, choice) in [(0, 0), (100, 1), (500, 2), (900, 3)] {
        advance_to(start, offset).await;
        h.vote(&[choice]).await;
        outcomes.push(h.engine.on_vote().await.unwrap());
    }

    let fire_at = BASE_MS + 100 + WINDOW_MS;
    assert!(matches!(
        outcomes[0],
        VoteOutcome::Recomputed(RecountOutcome::Written(_))
    ));
    assert_eq!(outcomes[1], VoteOutcome::Scheduled { fire_at });
    assert_eq!(outcomes[2], VoteOutcome::AlreadyPending { fire_at });
    assert_eq!(outcomes[3], VoteOutcome::AlreadyPending { fire_at });
    assert_eq!(
        h.store.load_control().await.unwrap().phase(),
        Phase::Pending { fire_at }
    );

    h.settle().await;

    let metrics = h.metrics.snapshot();
    assert_eq!(metrics.recomputes_immediate, 1);
    assert_eq!(metrics.recomputes_deferred, 1);

    let snapshot = h.store.read_snapshot().await.unwrap().unwrap();
    assert!(snapshot.computed_at_ms >= BASE_MS + WINDOW_MS);
    assert_eq!(snapshot.total_responses, 4);
    for key in ["q1c1", "q1c2", "q1c3", "q1c4"] {
        assert_eq!(snapshot.count(key), 1, "{key}");
    }
    assert_eq!(h.store.load_control().await.unwrap().phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_recount_rate_is_bounded_per_window() {
    let start = tokio::time::Instant::now();
    let h = Harness::manual(Arc::new(MemorySurveyStore::with_questions(
        default_questions(),
    )));
    let mut rng = rand::thread_rng();

    let mut offsets: Vec<u64> = (0..200).map(|_| rng.gen_range(0..WINDOW_MS as u64)).collect();
    offsets.sort_unstable();
    for offset in offsets {
        advance_to(start, offset).await;
        h.vote(&[rng.gen_range(0..9)]).await;
        h.engine.on_vote().await.unwrap();
    }
    h.settle().await;

    assert!(h.metrics.snapshot().recomputes_total() <= 2);
    let snapshot = h.store.read_snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.total_responses, 200);
}

/// Store that yields right after reading control state, so two engine
/// calls interleave between their read and their compare-and-swap.
struct YieldingStore(MemorySurveyStore);

#[async_trait]
impl SurveyStore for YieldingStore {
    async fn list_questions(&self) -> AppResult<Vec<Question>> {
        self.0.list_questions().await
    }
    async fn find_question(&self, id: &str) -> AppResult<Option<Question>> {
        self.0.find_question(id).await
    }
    async fn save_question(&self, question: &Question) -> AppResult<()> {
        self.0.save_question(question).await
    }
    async fn record_response(&self, response: &NewResponse) -> AppResult<()> {
        self.0.record_response(response).await
    }
    async fn count_responses(&self) -> AppResult<u64> {
        self.0.count_responses().await
    }
    async fn read_counters(&self) -> AppResult<CounterTotals> {
        self.0.read_counters().await
    }
    async fn load_control(&self) -> AppResult<ControlState> {
        let state = self.0.load_control().await;
        tokio::task::yield_now().await;
        state
    }
    async fn compare_and_swap_control(
        &self,
        expected_version: i64,
        next: &ControlState,
    ) -> AppResult<bool> {
        self.0.compare_and_swap_control(expected_version, next).await
    }
    async fn read_snapshot(&self) -> AppResult<Option<AggregateSnapshot>> {
        self.0.read_snapshot().await
    }
    async fn write_snapshot(&self, snapshot: &AggregateSnapshot) -> AppResult<bool> {
        self.0.write_snapshot(snapshot).await
    }
    async fn reset(&self, now_ms: i64) -> AppResult<AggregateSnapshot> {
        self.0.reset(now_ms).await
    }
}

fn response(id: &str, q1: u32) -> NewResponse {
    NewResponse {
        id: id.to_string(),
        answers: BTreeMap::from([("q1".to_string(), BTreeSet::from([q1]))]),
        submitted_at: Utc::now(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_racing_events_lose_no_updates() {
    let store = Arc::new(YieldingStore(MemorySurveyStore::with_questions(
        default_questions(),
    )));
    let metrics = Arc::new(Metrics::new());
    let engine = Arc::new(AggregationEngine::new(
        store.clone(),
        SnapshotHub::new(),
        Arc::new(NoOpSnapshotPublisher),
        Arc::clone(&metrics),
        Clock::starting_at(BASE_MS),
        EngineSettings {
            window_ms: WINDOW_MS,
            store_timeout: TIMEOUT,
            max_cas_retries: 8,
        },
    ));

    // Take the immediate recount so both racers land inside the window.
    store.record_response(&response("r1", 0)).await.unwrap();
    engine.on_vote().await.unwrap();

    store.record_response(&response("r2", 1)).await.unwrap();
    store.record_response(&response("r3", 2)).await.unwrap();
    let (a, b) = tokio::join!(engine.on_vote(), engine.on_vote());
    let outcomes = [a.unwrap(), b.unwrap()];

    let scheduled = outcomes
        .iter()
        .filter(|o| matches!(o, VoteOutcome::Scheduled { .. }))
        .count();
    assert_eq!(scheduled, 1, "exactly one racer arms the timer: {outcomes:?}");
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, VoteOutcome::AlreadyPending { .. })));
    assert!(metrics.snapshot().cas_conflicts >= 1);

    tokio::time::sleep(Duration::from_millis(3 * WINDOW_MS as u64)).await;
    let snapshot = store.read_snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.total_responses, 3);
    assert_eq!(snapshot.count("q1c1"), 1);
    assert_eq!(snapshot.count("q1c2"), 1);
    assert_eq!(snapshot.count("q1c3"), 1);
    assert_eq!(metrics.snapshot().recomputes_total(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_random_concurrent_burst_matches_expected_tallies() {
    let h = Harness::listening();
    let mut rng = rand::thread_rng();
    let mut expected: BTreeMap<String, i64> = BTreeMap::new();
    let mut tasks = Vec::new();

    for _ in 0..100 {
        // Random non-empty subset of q1's nine choices and q2's five.
        let q1: Vec<u32> = (0..9).filter(|_| rng.gen_bool(0.3)).collect();
        let q2: Vec<u32> = (0..5).filter(|_| rng.gen_bool(0.3)).collect();
        let q1 = if q1.is_empty() { vec![rng.gen_range(0..9)] } else { q1 };
        for &i in &q1 {
            *expected.entry(format!("q1c{}", i + 1)).or_default() += 1;
        }
        for &i in &q2 {
            *expected.entry(format!("q2c{}", i + 1)).or_default() += 1;
        }

        let votes = h.votes.clone();
        let body = json!({ "answers": { "q1": q1, "q2": q2 }, "timestamp": "2025-03-01T12:00:00Z" });
        tasks.push(tokio::spawn(async move { votes.submit(&body).await.unwrap() }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    h.settle().await;

    let snapshot = h.results.snapshot().await.unwrap();
    assert_eq!(snapshot.total_responses, 100);
    for (key, count) in expected {
        assert_eq!(snapshot.count(&key), count, "{key}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_everything_and_later_votes_start_from_zero() {
    let h = Harness::listening();
    h.vote(&[0]).await;
    h.vote(&[1]).await;
    h.settle().await;

    let empty = h.admin.reset().await.unwrap();
    assert_eq!(empty.total_responses, 0);
    assert_eq!(h.admin.response_count().await.unwrap(), 0);
    assert_eq!(h.store.load_control().await.unwrap().phase(), Phase::Idle);

    let after_reset = h.results.snapshot().await.unwrap();
    assert_eq!(after_reset.total_responses, 0);
    assert!(after_reset.counters.values().all(|&c| c == 0));
    assert_eq!(h.hub.current().unwrap().generation, empty.generation);

    // A second reset changes nothing observable.
    h.admin.reset().await.unwrap();
    assert_eq!(h.results.snapshot().await.unwrap().total_responses, 0);

    h.vote(&[2]).await;
    h.settle().await;

    let snapshot = h.results.snapshot().await.unwrap();
    assert_eq!(snapshot.total_responses, 1);
    assert_eq!(snapshot.count("q1c1"), 0);
    assert_eq!(snapshot.count("q1c3"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_while_pending_rearms_the_trailing_recount() {
    let store = Arc::new(MemorySurveyStore::with_questions(default_questions()));
    let h = Harness::manual(store.clone());
    h.vote(&[0]).await;
    h.vote(&[1]).await;

    // Left behind by an instance that crashed before its timer fired.
    let fire_at = BASE_MS + 800;
    let orphan = ControlState::initial()
        .claimed(BASE_MS - 200)
        .scheduled(fire_at);
    assert!(store.compare_and_swap_control(0, &orphan).await.unwrap());

    assert_eq!(
        h.engine.recover().await.unwrap(),
        Recovery::Rearmed { fire_at }
    );
    assert!(store.read_snapshot().await.unwrap().is_none());

    h.settle().await;

    let snapshot = store.read_snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.total_responses, 2);
    assert_eq!(snapshot.count("q1c1"), 1);
    assert_eq!(snapshot.count("q1c2"), 1);
    assert_eq!(h.metrics.snapshot().recomputes_deferred, 1);
    assert_eq!(store.load_control().await.unwrap().phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_restart_while_idle_runs_catch_up_recount() {
    let store = Arc::new(MemorySurveyStore::with_questions(default_questions()));
    let h = Harness::manual(store.clone());

    // Stored but never aggregated, e.g. the event was lost in a crash.
    h.vote(&[3]).await;
    h.vote(&[3]).await;
    assert!(store.read_snapshot().await.unwrap().is_none());

    let Recovery::Recounted(RecountOutcome::Written(snapshot)) = h.engine.recover().await.unwrap()
    else {
        panic!("expected a catch-up recount");
    };
    assert_eq!(snapshot.count("q1c4"), 2);
    assert_eq!(snapshot.total_responses, 2);
}
