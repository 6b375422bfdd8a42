//! Response repository.

use std::sync::Arc;

use crate::entities::{response, Response};
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait};
use tally_common::{AppError, AppResult};

/// Response repository for database operations.
#[derive(Clone)]
pub struct ResponseRepository {
    db: Arc<DatabaseConnection>,
}

impl ResponseRepository {
    /// Create a new response repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert a response row.
    pub async fn insert_in<C: ConnectionTrait>(
        conn: &C,
        model: response::ActiveModel,
    ) -> AppResult<response::Model> {
        model
            .insert(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Number of stored responses.
    pub async fn count(&self) -> AppResult<u64> {
        Response::find()
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Delete every response. Returns the number of rows removed.
    pub async fn delete_all_in<C: ConnectionTrait>(conn: &C) -> AppResult<u64> {
        let result = Response::delete_many()
            .exec(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(result.rows_affected)
    }
}
