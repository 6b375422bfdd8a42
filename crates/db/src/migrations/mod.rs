//! Database migrations.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20250101_000001_create_question_table;
mod m20250101_000002_create_response_table;
mod m20250101_000003_create_aggregation_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_question_table::Migration),
            Box::new(m20250101_000002_create_response_table::Migration),
            Box::new(m20250101_000003_create_aggregation_tables::Migration),
        ]
    }
}
