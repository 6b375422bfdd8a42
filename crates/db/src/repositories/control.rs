//! Aggregation control repository.

use std::sync::Arc;

use crate::entities::{aggregation_control, AggregationControl};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QuerySelect,
};
use tally_common::{AppError, AppResult};

const STATE_COLUMNS: [aggregation_control::Column; 4] = [
    aggregation_control::Column::LastRunMs,
    aggregation_control::Column::DebounceScheduled,
    aggregation_control::Column::DebouncedAtMs,
    aggregation_control::Column::Version,
];

/// Control state repository for database operations.
#[derive(Clone)]
pub struct ControlRepository {
    db: Arc<DatabaseConnection>,
}

impl ControlRepository {
    /// Create a new control repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The control row, if one was ever written.
    pub async fn find(&self) -> AppResult<Option<aggregation_control::Model>> {
        AggregationControl::find_by_id(aggregation_control::CONTROL_ID)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// The control row locked for update inside a transaction.
    pub async fn find_for_update_in<C: ConnectionTrait>(
        conn: &C,
    ) -> AppResult<Option<aggregation_control::Model>> {
        AggregationControl::find_by_id(aggregation_control::CONTROL_ID)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Replace the row with `next` if its version is still `expected_version`.
    ///
    /// A missing row counts as version 0.
    pub async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: aggregation_control::Model,
    ) -> AppResult<bool> {
        let affected = if expected_version == 0 {
            AggregationControl::insert(next.into_active_model())
                .on_conflict(
                    OnConflict::column(aggregation_control::Column::Id)
                        .update_columns(STATE_COLUMNS)
                        .action_and_where(
                            Expr::col((AggregationControl, aggregation_control::Column::Version))
                                .eq(0),
                        )
                        .to_owned(),
                )
                .exec_without_returning(self.db.as_ref())
                .await
                .map_err(|e| AppError::Storage(e.to_string()))?
        } else {
            AggregationControl::update_many()
                .col_expr(
                    aggregation_control::Column::LastRunMs,
                    Expr::value(next.last_run_ms),
                )
                .col_expr(
                    aggregation_control::Column::DebounceScheduled,
                    Expr::value(next.debounce_scheduled),
                )
                .col_expr(
                    aggregation_control::Column::DebouncedAtMs,
                    Expr::value(next.debounced_at_ms),
                )
                .col_expr(aggregation_control::Column::Version, Expr::value(next.version))
                .filter(aggregation_control::Column::Id.eq(aggregation_control::CONTROL_ID))
                .filter(aggregation_control::Column::Version.eq(expected_version))
                .exec(self.db.as_ref())
                .await
                .map_err(|e| AppError::Storage(e.to_string()))?
                .rows_affected
        };
        Ok(affected == 1)
    }

    /// Overwrite the row regardless of version.
    pub async fn replace_in<C: ConnectionTrait>(
        conn: &C,
        model: aggregation_control::Model,
    ) -> AppResult<()> {
        AggregationControl::insert(model.into_active_model())
            .on_conflict(
                OnConflict::column(aggregation_control::Column::Id)
                    .update_columns(STATE_COLUMNS)
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn control_row(version: i64) -> aggregation_control::Model {
        aggregation_control::Model {
            id: aggregation_control::CONTROL_ID.to_string(),
            last_run_ms: 1_000,
            debounce_scheduled: false,
            debounced_at_ms: None,
            version,
        }
    }

    #[tokio::test]
    async fn test_find_missing_row() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<aggregation_control::Model>::new()])
                .into_connection(),
        );

        let repo = ControlRepository::new(db);
        assert!(repo.find().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_swap_succeeds_on_matching_version() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = ControlRepository::new(db);
        assert!(repo.compare_and_swap(3, control_row(4)).await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_swap_fails_on_stale_version() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = ControlRepository::new(db);
        assert!(!repo.compare_and_swap(3, control_row(4)).await.unwrap());
    }
}
