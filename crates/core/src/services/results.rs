//! Aggregate reader.
//!
//! [`SnapshotHub`] holds the newest snapshot this process knows about and
//! wakes subscribers when it changes. [`ResultsService`] serves point reads
//! and the per-question view used by the results page.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tally_common::AppResult;
use tally_db::model::{AggregateSnapshot, Question};
use tally_db::SurveyStore;
use tokio::sync::watch;
use tracing::warn;

use super::timeout::bounded;

/// Latest-snapshot broadcast.
///
/// Only snapshots with a higher generation than the current one are
/// accepted, so late or duplicate deliveries never move readers backwards.
#[derive(Clone)]
pub struct SnapshotHub {
    tx: Arc<watch::Sender<Option<Arc<AggregateSnapshot>>>>,
}

impl SnapshotHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Offer a snapshot. Returns whether it replaced the current one.
    pub fn publish(&self, snapshot: Arc<AggregateSnapshot>) -> bool {
        self.tx.send_if_modified(|current| {
            let newer = current
                .as_ref()
                .is_none_or(|c| snapshot.generation > c.generation);
            if newer {
                *current = Some(Arc::clone(&snapshot));
            }
            newer
        })
    }

    /// The newest snapshot seen, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<AggregateSnapshot>> {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every accepted snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AggregateSnapshot>>> {
        self.tx.subscribe()
    }
}

impl Default for SnapshotHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One choice in the per-question results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceResult {
    pub text: String,
    pub votes: i64,
    /// Share of this question's votes, 0 to 100. Zero when nobody voted.
    pub percentage: f64,
}

/// Results for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub id: String,
    pub question: String,
    pub total_votes: i64,
    pub choices: Vec<ChoiceResult>,
}

impl QuestionResult {
    /// Join a question with the counts in a snapshot.
    #[must_use]
    pub fn from_snapshot(question: &Question, snapshot: &AggregateSnapshot) -> Self {
        let votes: Vec<i64> = question
            .counter_keys()
            .map(|key| snapshot.count(&key))
            .collect();
        let total_votes: i64 = votes.iter().sum();

        let choices = question
            .choices
            .iter()
            .zip(votes)
            .map(|(choice, votes)| ChoiceResult {
                text: choice.text.clone(),
                votes,
                percentage: percentage(votes, total_votes),
            })
            .collect();

        Self {
            id: question.id.clone(),
            question: question.question.clone(),
            total_votes,
            choices,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(votes: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    votes as f64 / total as f64 * 100.0
}

/// Results service.
#[derive(Clone)]
pub struct ResultsService {
    store: Arc<dyn SurveyStore>,
    hub: SnapshotHub,
    store_timeout: Duration,
}

impl ResultsService {
    /// Create a new results service.
    #[must_use]
    pub fn new(store: Arc<dyn SurveyStore>, hub: SnapshotHub, store_timeout: Duration) -> Self {
        Self {
            store,
            hub,
            store_timeout,
        }
    }

    /// The current snapshot.
    ///
    /// Reads the store first. If the store is unreachable the hub's copy is
    /// served instead; if nothing was ever computed an all-zero snapshot is
    /// returned.
    pub async fn snapshot(&self) -> AppResult<Arc<AggregateSnapshot>> {
        match bounded(self.store_timeout, self.store.read_snapshot()).await {
            Ok(Some(stored)) => {
                let stored = Arc::new(stored);
                self.hub.publish(Arc::clone(&stored));
                Ok(self.hub.current().unwrap_or(stored))
            }
            Ok(None) => match self.hub.current() {
                Some(current) => Ok(current),
                None => {
                    let questions = bounded(self.store_timeout, self.store.list_questions()).await?;
                    Ok(Arc::new(AggregateSnapshot::empty(&questions, 0, 0)))
                }
            },
            Err(e) => {
                if let Some(current) = self.hub.current() {
                    warn!(error = %e, "Snapshot read failed; serving cached copy");
                    Ok(current)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Live snapshot updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AggregateSnapshot>>> {
        self.hub.subscribe()
    }

    /// Per-question results with percentages, in question order.
    pub async fn question_results(&self) -> AppResult<Vec<QuestionResult>> {
        let questions = bounded(self.store_timeout, self.store.list_questions()).await?;
        let snapshot = self.snapshot().await?;
        Ok(questions
            .iter()
            .map(|question| QuestionResult::from_snapshot(question, &snapshot))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tally_db::model::Choice;
    use tally_db::MemorySurveyStore;

    fn question() -> Question {
        Question {
            id: "q1".to_string(),
            question: "Pick".to_string(),
            choices: vec![
                Choice {
                    text: "A".to_string(),
                },
                Choice {
                    text: "B".to_string(),
                },
            ],
            sort_order: 1,
        }
    }

    fn snapshot(generation: i64, q1c1: i64, q1c2: i64) -> Arc<AggregateSnapshot> {
        let mut counters = BTreeMap::new();
        counters.insert("q1c1".to_string(), q1c1);
        counters.insert("q1c2".to_string(), q1c2);
        Arc::new(AggregateSnapshot {
            total_responses: q1c1 + q1c2,
            counters,
            generation,
            computed_at_ms: 0,
        })
    }

    #[test]
    fn test_hub_rejects_older_generations() {
        let hub = SnapshotHub::new();
        let mut rx = hub.subscribe();

        assert!(hub.publish(snapshot(2, 1, 0)));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(!hub.publish(snapshot(1, 5, 5)));
        assert!(!hub.publish(snapshot(2, 5, 5)));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(hub.current().unwrap().generation, 2);
    }

    #[test]
    fn test_percentages() {
        let result = QuestionResult::from_snapshot(&question(), &snapshot(1, 3, 1));
        assert_eq!(result.total_votes, 4);
        assert!((result.choices[0].percentage - 75.0).abs() < f64::EPSILON);
        assert!((result.choices[1].percentage - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentage_zero_denominator() {
        let result = QuestionResult::from_snapshot(&question(), &snapshot(1, 0, 0));
        assert_eq!(result.total_votes, 0);
        assert!(result.choices.iter().all(|c| c.percentage == 0.0));
    }

    #[tokio::test]
    async fn test_snapshot_defaults_to_zeroes() {
        let store = Arc::new(MemorySurveyStore::with_questions([question()]));
        let service = ResultsService::new(store, SnapshotHub::new(), Duration::from_secs(1));

        let snapshot = service.snapshot().await.unwrap();

        assert_eq!(snapshot.total_responses, 0);
        assert_eq!(snapshot.count("q1c2"), 0);
        assert!(snapshot.counters.contains_key("q1c2"));
    }
}
