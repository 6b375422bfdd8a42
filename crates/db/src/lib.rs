//! Persistence layer for tally.
//!
//! [`SurveyStore`] is the seam between the aggregation pipeline and storage;
//! [`PgSurveyStore`] implements it on `PostgreSQL` and [`MemorySurveyStore`]
//! keeps everything in process.

pub mod entities;
pub mod memory;
pub mod migrations;
pub mod model;
pub mod pg_store;
pub mod repositories;
pub mod store;
pub mod test_utils;

pub use memory::MemorySurveyStore;
pub use pg_store::PgSurveyStore;
pub use store::SurveyStore;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tally_common::{AppError, Config};
use tracing::log::LevelFilter;

/// Initialize database connection.
pub async fn init(config: &Config) -> Result<DatabaseConnection, AppError> {
    let mut opt = ConnectOptions::new(&config.database.url);

    opt.max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(config.aggregation.store_timeout())
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);

    Database::connect(opt)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))
}

/// Run pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), AppError> {
    use sea_orm_migration::MigratorTrait;
    migrations::Migrator::up(db, None)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))
}
