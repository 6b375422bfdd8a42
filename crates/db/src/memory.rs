//! In-process [`SurveyStore`].
//!
//! Every operation takes one lock over the whole state, which gives the same
//! atomicity as the `PostgreSQL` store's transactions. Used for
//! `store = "memory"` deployments and throughout the test-suites.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tally_common::AppResult;
use tokio::sync::Mutex;

use crate::model::{
    AggregateSnapshot, ControlState, CounterTotals, NewResponse, Question, TOTAL_RESPONSES_KEY,
};
use crate::store::SurveyStore;

#[derive(Debug, Default)]
struct MemoryState {
    questions: BTreeMap<String, Question>,
    responses: Vec<NewResponse>,
    counters: BTreeMap<String, i64>,
    snapshot: Option<AggregateSnapshot>,
    control: Option<ControlState>,
}

/// Survey store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemorySurveyStore {
    state: Mutex<MemoryState>,
}

impl MemorySurveyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with questions.
    #[must_use]
    pub fn with_questions(questions: impl IntoIterator<Item = Question>) -> Self {
        let state = MemoryState {
            questions: questions
                .into_iter()
                .map(|q| (q.id.clone(), q))
                .collect(),
            ..MemoryState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }
}

#[async_trait]
impl SurveyStore for MemorySurveyStore {
    async fn list_questions(&self) -> AppResult<Vec<Question>> {
        let state = self.state.lock().await;
        let mut questions: Vec<Question> = state.questions.values().cloned().collect();
        questions.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.id.cmp(&b.id)));
        Ok(questions)
    }

    async fn find_question(&self, id: &str) -> AppResult<Option<Question>> {
        Ok(self.state.lock().await.questions.get(id).cloned())
    }

    async fn save_question(&self, question: &Question) -> AppResult<()> {
        self.state
            .lock()
            .await
            .questions
            .insert(question.id.clone(), question.clone());
        Ok(())
    }

    async fn record_response(&self, response: &NewResponse) -> AppResult<()> {
        let mut state = self.state.lock().await;
        for key in response.counter_keys() {
            *state.counters.entry(key).or_insert(0) += 1;
        }
        *state
            .counters
            .entry(TOTAL_RESPONSES_KEY.to_string())
            .or_insert(0) += 1;
        state.responses.push(response.clone());
        Ok(())
    }

    async fn count_responses(&self) -> AppResult<u64> {
        Ok(self.state.lock().await.responses.len() as u64)
    }

    async fn read_counters(&self) -> AppResult<CounterTotals> {
        let state = self.state.lock().await;
        let mut counters = state.counters.clone();
        let total_responses = counters.remove(TOTAL_RESPONSES_KEY).unwrap_or(0);
        Ok(CounterTotals {
            counters,
            total_responses,
        })
    }

    async fn load_control(&self) -> AppResult<ControlState> {
        Ok(self
            .state
            .lock()
            .await
            .control
            .unwrap_or_else(ControlState::initial))
    }

    async fn compare_and_swap_control(
        &self,
        expected_version: i64,
        next: &ControlState,
    ) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let current = state.control.unwrap_or_else(ControlState::initial);
        if current.version != expected_version {
            return Ok(false);
        }
        state.control = Some(*next);
        Ok(true)
    }

    async fn read_snapshot(&self) -> AppResult<Option<AggregateSnapshot>> {
        Ok(self.state.lock().await.snapshot.clone())
    }

    async fn write_snapshot(&self, snapshot: &AggregateSnapshot) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        if let Some(current) = &state.snapshot
            && current.generation >= snapshot.generation
        {
            return Ok(false);
        }
        state.snapshot = Some(snapshot.clone());
        Ok(true)
    }

    async fn reset(&self, now_ms: i64) -> AppResult<AggregateSnapshot> {
        let mut state = self.state.lock().await;
        state.responses.clear();
        state.counters.clear();

        let version = state.control.map_or(0, |c| c.version) + 1;
        state.control = Some(ControlState {
            version,
            ..ControlState::initial()
        });

        let questions: Vec<Question> = state.questions.values().cloned().collect();
        let empty = AggregateSnapshot::empty(&questions, version, now_ms);
        state.snapshot = Some(empty.clone());
        Ok(empty)
    }
}
