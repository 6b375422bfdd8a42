//! Aggregate snapshot repository.

use std::sync::Arc;

use crate::entities::{aggregate_snapshot, AggregateSnapshot};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ConnectionTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
};
use tally_common::{AppError, AppResult};

const SNAPSHOT_COLUMNS: [aggregate_snapshot::Column; 4] = [
    aggregate_snapshot::Column::Counters,
    aggregate_snapshot::Column::TotalResponses,
    aggregate_snapshot::Column::Generation,
    aggregate_snapshot::Column::ComputedAt,
];

/// Snapshot repository for database operations.
#[derive(Clone)]
pub struct SnapshotRepository {
    db: Arc<DatabaseConnection>,
}

impl SnapshotRepository {
    /// Create a new snapshot repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The live snapshot row, if one was ever written.
    pub async fn find_live(&self) -> AppResult<Option<aggregate_snapshot::Model>> {
        AggregateSnapshot::find_by_id(aggregate_snapshot::LIVE_ID)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Write the row unless the stored one has an equal or higher generation.
    ///
    /// Runs as one `INSERT .. ON CONFLICT DO UPDATE .. WHERE` statement.
    pub async fn write_if_newer(&self, model: aggregate_snapshot::Model) -> AppResult<bool> {
        let generation = model.generation;
        let written = AggregateSnapshot::insert(model.into_active_model())
            .on_conflict(
                OnConflict::column(aggregate_snapshot::Column::Id)
                    .update_columns(SNAPSHOT_COLUMNS)
                    .action_and_where(
                        Expr::col((AggregateSnapshot, aggregate_snapshot::Column::Generation))
                            .lt(generation),
                    )
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(written > 0)
    }

    /// Overwrite the row regardless of generation.
    pub async fn replace_in<C: ConnectionTrait>(
        conn: &C,
        model: aggregate_snapshot::Model,
    ) -> AppResult<()> {
        AggregateSnapshot::insert(model.into_active_model())
            .on_conflict(
                OnConflict::column(aggregate_snapshot::Column::Id)
                    .update_columns(SNAPSHOT_COLUMNS)
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(())
    }
}
