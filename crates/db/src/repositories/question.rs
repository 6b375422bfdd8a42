//! Question repository.

use std::sync::Arc;

use crate::entities::{question, Question};
use sea_orm::{
    sea_query::OnConflict, ConnectionTrait, DatabaseConnection, EntityTrait, QueryOrder,
};
use tally_common::{AppError, AppResult};

/// Question repository for database operations.
#[derive(Clone)]
pub struct QuestionRepository {
    db: Arc<DatabaseConnection>,
}

impl QuestionRepository {
    /// Create a new question repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// All questions ordered by `sort_order`, then id.
    pub async fn find_all(&self) -> AppResult<Vec<question::Model>> {
        Self::find_all_in(self.db.as_ref()).await
    }

    /// Same as [`Self::find_all`] on an arbitrary connection or transaction.
    pub async fn find_all_in<C: ConnectionTrait>(conn: &C) -> AppResult<Vec<question::Model>> {
        Question::find()
            .order_by_asc(question::Column::SortOrder)
            .order_by_asc(question::Column::Id)
            .all(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Find a question by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<question::Model>> {
        Question::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Insert a question, replacing text, choices and order if it exists.
    pub async fn upsert(&self, model: question::ActiveModel) -> AppResult<()> {
        Question::insert(model)
            .on_conflict(
                OnConflict::column(question::Column::Id)
                    .update_columns([
                        question::Column::Question,
                        question::Column::Choices,
                        question::Column::SortOrder,
                        question::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(())
    }
}
