//! Vote ingest.
//!
//! Validates a submission against the current questions, stores it together
//! with its counter increments, and notifies the aggregation engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tally_common::{AppError, AppResult, IdGenerator, Metrics};
use tally_db::model::{NewResponse, Question};
use tally_db::SurveyStore;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::aggregation::VoteEvent;
use super::timeout::bounded;
use crate::clock::Clock;

/// Vote ingest service.
#[derive(Clone)]
pub struct VoteService {
    store: Arc<dyn SurveyStore>,
    events: mpsc::Sender<VoteEvent>,
    metrics: Arc<Metrics>,
    clock: Clock,
    store_timeout: Duration,
    id_gen: IdGenerator,
}

impl VoteService {
    /// Create a new vote service.
    #[must_use]
    pub fn new(
        store: Arc<dyn SurveyStore>,
        events: mpsc::Sender<VoteEvent>,
        metrics: Arc<Metrics>,
        clock: Clock,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            events,
            metrics,
            clock,
            store_timeout,
            id_gen: IdGenerator::new(),
        }
    }

    /// Validate and persist a submission. Returns the new response id.
    ///
    /// Nothing is written unless the whole payload is valid. Aggregation
    /// happens afterwards and never fails the submission.
    pub async fn submit(&self, payload: &Value) -> AppResult<String> {
        let questions = bounded(self.store_timeout, self.store.list_questions()).await?;

        let response = match parse_submission(payload, &questions, self.id_gen.generate()) {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_vote_rejected();
                debug!(error = %e, "Rejected submission");
                return Err(e);
            }
        };

        bounded(self.store_timeout, self.store.record_response(&response)).await?;
        self.metrics.record_vote_accepted();

        let event = VoteEvent {
            response_id: response.id.clone(),
            received_at_ms: self.clock.now_ms(),
        };
        match self.events.try_send(event) {
            Ok(()) => {}
            // Every queued event runs after this response was stored, so any
            // of them will cover it.
            Err(TrySendError::Full(event)) => {
                self.metrics.record_vote_event_dropped();
                debug!(response_id = %event.response_id, "Vote event queue full");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(response_id = %event.response_id, "Aggregation listener is gone");
            }
        }

        Ok(response.id)
    }
}

/// Accept ISO-8601 timestamps: RFC 3339 with an offset, or a local date-time
/// or bare date, both taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    const LOCAL_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // `Z` suffix without seconds, e.g. `2025-03-01T12:00Z`.
    let local = raw.strip_suffix('Z').unwrap_or(raw);
    if let Some(ts) = LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(local, format).ok())
    {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// Turn a raw `{ answers, timestamp }` payload into a [`NewResponse`].
///
/// Every question id must exist and every index must address one of its
/// choices. Duplicate indices collapse; at least one choice must be selected.
pub fn parse_submission(
    payload: &Value,
    questions: &[Question],
    id: String,
) -> AppResult<NewResponse> {
    let invalid_answers = || AppError::Validation("Invalid answers format".to_string());

    let answers = payload
        .get("answers")
        .and_then(Value::as_object)
        .filter(|answers| !answers.is_empty())
        .ok_or_else(invalid_answers)?;

    let submitted_at = payload
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .ok_or_else(|| AppError::Validation("Invalid timestamp format".to_string()))?;

    let mut selections = BTreeMap::new();
    for (question_id, selected) in answers {
        let question = questions
            .iter()
            .find(|q| &q.id == question_id)
            .ok_or_else(|| AppError::Validation(format!("Unknown question: {question_id}")))?;

        let indices = selected.as_array().ok_or_else(invalid_answers)?;
        let mut chosen = BTreeSet::new();
        for index in indices {
            let index = index
                .as_u64()
                .and_then(|i| u32::try_from(i).ok())
                .ok_or_else(invalid_answers)?;
            if index as usize >= question.choices.len() {
                return Err(AppError::Validation(format!(
                    "Choice {index} out of range for {question_id}"
                )));
            }
            chosen.insert(index);
        }
        selections.insert(question_id.clone(), chosen);
    }

    if selections.values().all(BTreeSet::is_empty) {
        return Err(AppError::Validation("No choices selected".to_string()));
    }

    Ok(NewResponse {
        id,
        answers: selections,
        submitted_at,
    })
}
