//! Choice counter repository.

use chrono::Utc;

use crate::entities::{choice_counter, ChoiceCounter};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ConnectionTrait, EntityTrait, Set,
};
use tally_common::{AppError, AppResult};

/// Counter operations. All of them run inside the caller's transaction.
pub struct CounterRepository;

impl CounterRepository {
    /// Add one to each key, creating missing rows at one.
    ///
    /// Keys must be distinct; Postgres refuses to touch one row twice in a
    /// single upsert.
    pub async fn increment_in<C: ConnectionTrait>(conn: &C, keys: &[String]) -> AppResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let rows = keys.iter().map(|key| choice_counter::ActiveModel {
            key: Set(key.clone()),
            count: Set(1),
            updated_at: Set(now.into()),
        });

        ChoiceCounter::insert_many(rows)
            .on_conflict(
                OnConflict::column(choice_counter::Column::Key)
                    .value(
                        choice_counter::Column::Count,
                        Expr::col((ChoiceCounter, choice_counter::Column::Count)).add(1),
                    )
                    .update_column(choice_counter::Column::UpdatedAt)
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Every counter row.
    pub async fn find_all_in<C: ConnectionTrait>(
        conn: &C,
    ) -> AppResult<Vec<choice_counter::Model>> {
        ChoiceCounter::find()
            .all(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Delete every counter, including the response total.
    pub async fn delete_all_in<C: ConnectionTrait>(conn: &C) -> AppResult<()> {
        ChoiceCounter::delete_many()
            .exec(conn)
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

    #[tokio::test]
    async fn test_increment_issues_single_upsert() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 2,
            }])
            .into_connection();

        CounterRepository::increment_in(&db, &["q1c1".to_string(), "totalResponses".to_string()])
            .await
            .unwrap();

        let log = db.into_transaction_log();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_increment_nothing_is_noop() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        CounterRepository::increment_in(&db, &[]).await.unwrap();
        assert!(db.into_transaction_log().is_empty());
    }
}
