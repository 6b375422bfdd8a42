//! Storage-agnostic survey model shared by every [`SurveyStore`] backend.
//!
//! [`SurveyStore`]: crate::store::SurveyStore

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved counter key holding the number of persisted responses.
pub const TOTAL_RESPONSES_KEY: &str = "totalResponses";

/// Counter key for a choice: `"{question_id}c{index + 1}"`.
///
/// The 1-based suffix is part of the public results format and must not change.
#[must_use]
pub fn counter_key(question_id: &str, choice_index: u32) -> String {
    format!("{question_id}c{}", choice_index + 1)
}

/// One selectable answer option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub text: String,
}

/// A survey question and its ordered choices.
///
/// A choice is addressed by its position, so choices may be renamed but
/// never reordered or removed once votes exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub question: String,
    pub choices: Vec<Choice>,
    pub sort_order: i32,
}

impl Question {
    /// Counter keys for every choice, in choice order.
    pub fn counter_keys(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.choices.len() as u32).map(|index| counter_key(&self.id, index))
    }
}

/// A validated submission ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResponse {
    pub id: String,
    /// Question id to the set of selected zero-based choice indices.
    pub answers: BTreeMap<String, BTreeSet<u32>>,
    pub submitted_at: DateTime<Utc>,
}

impl NewResponse {
    /// Counter keys this response increments, one per selected choice.
    pub fn counter_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.answers.iter().flat_map(|(question_id, indices)| {
            indices
                .iter()
                .map(move |&index| counter_key(question_id, index))
        })
    }
}

/// Raw counter values as read from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterTotals {
    pub counters: BTreeMap<String, i64>,
    pub total_responses: i64,
}

/// Materialised view of every counter plus the response total.
///
/// Serialises flat, e.g. `{ "totalResponses": 3, "q1c1": 2, "q1c2": 1 }`.
/// `generation` orders snapshots: a store never replaces a snapshot with one
/// of a lower generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    #[serde(rename = "totalResponses")]
    pub total_responses: i64,
    #[serde(flatten)]
    pub counters: BTreeMap<String, i64>,
    #[serde(skip)]
    pub generation: i64,
    #[serde(skip)]
    pub computed_at_ms: i64,
}

impl AggregateSnapshot {
    /// Value of one counter, zero if absent.
    #[must_use]
    pub fn count(&self, key: &str) -> i64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// An all-zero snapshot for the given questions.
    #[must_use]
    pub fn empty(questions: &[Question], generation: i64, computed_at_ms: i64) -> Self {
        Self {
            total_responses: 0,
            counters: questions
                .iter()
                .flat_map(Question::counter_keys)
                .map(|key| (key, 0))
                .collect(),
            generation,
            computed_at_ms,
        }
    }
}

/// Whether a deferred recompute is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No recompute pending.
    Idle,
    /// A deferred recompute should run at `fire_at` (epoch milliseconds).
    Pending { fire_at: i64 },
}

/// Durable debounce bookkeeping for the aggregation engine.
///
/// Every transition bumps `version`; stores apply transitions with
/// compare-and-swap on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    /// Epoch milliseconds at which the last recount was claimed.
    pub last_run_ms: i64,
    pub debounce_scheduled: bool,
    pub debounced_at_ms: Option<i64>,
    pub version: i64,
}

impl ControlState {
    /// State before the first vote ever seen.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            last_run_ms: 0,
            debounce_scheduled: false,
            debounced_at_ms: None,
            version: 0,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match (self.debounce_scheduled, self.debounced_at_ms) {
            (true, Some(fire_at)) => Phase::Pending { fire_at },
            // A flag without a fire time is treated as already overdue.
            (true, None) => Phase::Pending { fire_at: 0 },
            (false, _) => Phase::Idle,
        }
    }

    /// Successor that records a recount claimed at `now_ms` and clears any schedule.
    #[must_use]
    pub const fn claimed(&self, now_ms: i64) -> Self {
        Self {
            last_run_ms: now_ms,
            debounce_scheduled: false,
            debounced_at_ms: None,
            version: self.version + 1,
        }
    }

    /// Successor that schedules a deferred recount at `fire_at`.
    #[must_use]
    pub const fn scheduled(&self, fire_at: i64) -> Self {
        Self {
            last_run_ms: self.last_run_ms,
            debounce_scheduled: true,
            debounced_at_ms: Some(fire_at),
            version: self.version + 1,
        }
    }
}
