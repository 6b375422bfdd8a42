//! `PostgreSQL` implementation of [`SurveyStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DatabaseTransaction, Set, TransactionTrait};
use tally_common::{AppError, AppResult};
use tracing::debug;

use crate::entities::{aggregate_snapshot, aggregation_control, question, response};
use crate::model::{
    AggregateSnapshot, Choice, ControlState, CounterTotals, NewResponse, Question,
    TOTAL_RESPONSES_KEY,
};
use crate::repositories::{
    ControlRepository, CounterRepository, QuestionRepository, ResponseRepository,
    SnapshotRepository,
};
use crate::store::SurveyStore;

/// Survey store backed by the sea-orm entities.
#[derive(Clone)]
pub struct PgSurveyStore {
    db: Arc<DatabaseConnection>,
    questions: QuestionRepository,
    responses: ResponseRepository,
    snapshots: SnapshotRepository,
    control: ControlRepository,
}

impl PgSurveyStore {
    /// Create a store on top of an existing connection pool.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            questions: QuestionRepository::new(Arc::clone(&db)),
            responses: ResponseRepository::new(Arc::clone(&db)),
            snapshots: SnapshotRepository::new(Arc::clone(&db)),
            control: ControlRepository::new(Arc::clone(&db)),
            db,
        }
    }

    async fn begin(&self) -> AppResult<DatabaseTransaction> {
        self.db
            .begin()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }
}

async fn commit(txn: DatabaseTransaction) -> AppResult<()> {
    txn.commit()
        .await
        .map_err(|e| AppError::Storage(e.to_string()))
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn question_from_row(row: question::Model) -> AppResult<Question> {
    let choices: Vec<Choice> = serde_json::from_value(row.choices)
        .map_err(|e| AppError::Storage(format!("malformed choices for {}: {e}", row.id)))?;
    Ok(Question {
        id: row.id,
        question: row.question,
        choices,
        sort_order: row.sort_order,
    })
}

fn snapshot_from_row(row: aggregate_snapshot::Model) -> AppResult<AggregateSnapshot> {
    let counters: BTreeMap<String, i64> = serde_json::from_value(row.counters)
        .map_err(|e| AppError::Storage(format!("malformed snapshot counters: {e}")))?;
    Ok(AggregateSnapshot {
        total_responses: row.total_responses,
        counters,
        generation: row.generation,
        computed_at_ms: row.computed_at.timestamp_millis(),
    })
}

fn snapshot_to_row(snapshot: &AggregateSnapshot) -> AppResult<aggregate_snapshot::Model> {
    Ok(aggregate_snapshot::Model {
        id: aggregate_snapshot::LIVE_ID.to_string(),
        counters: serde_json::to_value(&snapshot.counters)
            .map_err(|e| AppError::Internal(e.to_string()))?,
        total_responses: snapshot.total_responses,
        generation: snapshot.generation,
        computed_at: millis_to_datetime(snapshot.computed_at_ms).into(),
    })
}

impl From<aggregation_control::Model> for ControlState {
    fn from(row: aggregation_control::Model) -> Self {
        Self {
            last_run_ms: row.last_run_ms,
            debounce_scheduled: row.debounce_scheduled,
            debounced_at_ms: row.debounced_at_ms,
            version: row.version,
        }
    }
}

fn control_to_row(state: &ControlState) -> aggregation_control::Model {
    aggregation_control::Model {
        id: aggregation_control::CONTROL_ID.to_string(),
        last_run_ms: state.last_run_ms,
        debounce_scheduled: state.debounce_scheduled,
        debounced_at_ms: state.debounced_at_ms,
        version: state.version,
    }
}

#[async_trait]
impl SurveyStore for PgSurveyStore {
    async fn list_questions(&self) -> AppResult<Vec<Question>> {
        self.questions
            .find_all()
            .await?
            .into_iter()
            .map(question_from_row)
            .collect()
    }

    async fn find_question(&self, id: &str) -> AppResult<Option<Question>> {
        self.questions
            .find_by_id(id)
            .await?
            .map(question_from_row)
            .transpose()
    }

    async fn save_question(&self, question: &Question) -> AppResult<()> {
        let now = Utc::now();
        let model = question::ActiveModel {
            id: Set(question.id.clone()),
            question: Set(question.question.clone()),
            choices: Set(serde_json::to_value(&question.choices)
                .map_err(|e| AppError::Internal(e.to_string()))?),
            sort_order: Set(question.sort_order),
            created_at: Set(now.into()),
            updated_at: Set(Some(now.into())),
        };
        self.questions.upsert(model).await
    }

    async fn record_response(&self, new_response: &NewResponse) -> AppResult<()> {
        let model = response::ActiveModel {
            id: Set(new_response.id.clone()),
            answers: Set(serde_json::to_value(&new_response.answers)
                .map_err(|e| AppError::Internal(e.to_string()))?),
            submitted_at: Set(new_response.submitted_at.into()),
            created_at: Set(Utc::now().into()),
        };
        let mut keys: Vec<String> = new_response.counter_keys().collect();
        keys.push(TOTAL_RESPONSES_KEY.to_string());

        let txn = self.begin().await?;
        ResponseRepository::insert_in(&txn, model).await?;
        CounterRepository::increment_in(&txn, &keys).await?;
        commit(txn).await?;

        debug!(response_id = %new_response.id, counters = keys.len(), "Recorded response");
        Ok(())
    }

    async fn count_responses(&self) -> AppResult<u64> {
        self.responses.count().await
    }

    async fn read_counters(&self) -> AppResult<CounterTotals> {
        // One SELECT sees a single consistent snapshot of the table.
        let rows = CounterRepository::find_all_in(self.db.as_ref()).await?;
        let mut totals = CounterTotals::default();
        for row in rows {
            if row.key == TOTAL_RESPONSES_KEY {
                totals.total_responses = row.count;
            } else {
                totals.counters.insert(row.key, row.count);
            }
        }
        Ok(totals)
    }

    async fn load_control(&self) -> AppResult<ControlState> {
        Ok(self
            .control
            .find()
            .await?
            .map_or_else(ControlState::initial, ControlState::from))
    }

    async fn compare_and_swap_control(
        &self,
        expected_version: i64,
        next: &ControlState,
    ) -> AppResult<bool> {
        self.control
            .compare_and_swap(expected_version, control_to_row(next))
            .await
    }

    async fn read_snapshot(&self) -> AppResult<Option<AggregateSnapshot>> {
        self.snapshots
            .find_live()
            .await?
            .map(snapshot_from_row)
            .transpose()
    }

    async fn write_snapshot(&self, snapshot: &AggregateSnapshot) -> AppResult<bool> {
        self.snapshots.write_if_newer(snapshot_to_row(snapshot)?).await
    }

    async fn reset(&self, now_ms: i64) -> AppResult<AggregateSnapshot> {
        let txn = self.begin().await?;

        let current = ControlRepository::find_for_update_in(&txn)
            .await?
            .map_or_else(ControlState::initial, ControlState::from);
        let next = ControlState {
            version: current.version + 1,
            ..ControlState::initial()
        };

        let removed = ResponseRepository::delete_all_in(&txn).await?;
        CounterRepository::delete_all_in(&txn).await?;
        ControlRepository::replace_in(&txn, control_to_row(&next)).await?;

        let questions = QuestionRepository::find_all_in(&txn)
            .await?
            .into_iter()
            .map(question_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        let empty = AggregateSnapshot::empty(&questions, next.version, now_ms);
        SnapshotRepository::replace_in(&txn, snapshot_to_row(&empty)?).await?;

        commit(txn).await?;

        debug!(removed, generation = next.version, "Reset survey data");
        Ok(empty)
    }
}
