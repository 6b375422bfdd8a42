//! Durable store abstraction.
//!
//! The aggregation pipeline only talks to [`SurveyStore`], so the same
//! engine runs against `PostgreSQL` ([`PgSurveyStore`]) in production and
//! against [`MemorySurveyStore`] in development and tests.
//!
//! [`PgSurveyStore`]: crate::pg_store::PgSurveyStore
//! [`MemorySurveyStore`]: crate::memory::MemorySurveyStore

use async_trait::async_trait;
use tally_common::AppResult;

use crate::model::{AggregateSnapshot, ControlState, CounterTotals, NewResponse, Question};

/// Document store holding questions, raw responses, per-choice counters,
/// the aggregate snapshot and the aggregation control state.
///
/// Implementations must make `record_response`, `compare_and_swap_control`,
/// `write_snapshot` and `reset` atomic.
#[async_trait]
pub trait SurveyStore: Send + Sync {
    /// Questions ordered by `sort_order`.
    async fn list_questions(&self) -> AppResult<Vec<Question>>;

    /// A single question.
    async fn find_question(&self, id: &str) -> AppResult<Option<Question>>;

    /// Insert or replace a question.
    async fn save_question(&self, question: &Question) -> AppResult<()>;

    /// Persist a response and increment its counters plus the response
    /// total, all or nothing.
    async fn record_response(&self, response: &NewResponse) -> AppResult<()>;

    /// Number of persisted responses.
    async fn count_responses(&self) -> AppResult<u64>;

    /// Every per-choice counter and the response total, read consistently.
    async fn read_counters(&self) -> AppResult<CounterTotals>;

    /// Current control state, [`ControlState::initial`] if never written.
    async fn load_control(&self) -> AppResult<ControlState>;

    /// Replace the control state with `next` only if the stored version is
    /// still `expected_version`. Returns whether the swap happened.
    async fn compare_and_swap_control(
        &self,
        expected_version: i64,
        next: &ControlState,
    ) -> AppResult<bool>;

    /// The stored snapshot, if any.
    async fn read_snapshot(&self) -> AppResult<Option<AggregateSnapshot>>;

    /// Overwrite the snapshot unless the stored one has an equal or higher
    /// generation. Returns whether the write happened.
    async fn write_snapshot(&self, snapshot: &AggregateSnapshot) -> AppResult<bool>;

    /// Delete responses and counters and return the control state to idle.
    ///
    /// The control version is bumped and the snapshot replaced by an
    /// all-zero one carrying that version as its generation, so recounts
    /// claimed before the reset can no longer overwrite it. Questions are
    /// kept. Returns the zeroed snapshot.
    async fn reset(&self, now_ms: i64) -> AppResult<AggregateSnapshot>;
}
