//! Create counter, snapshot and control tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChoiceCounter::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChoiceCounter::Key)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChoiceCounter::Count)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ChoiceCounter::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AggregateSnapshot::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AggregateSnapshot::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AggregateSnapshot::Counters).json().not_null())
                    .col(
                        ColumnDef::new(AggregateSnapshot::TotalResponses)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AggregateSnapshot::Generation)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AggregateSnapshot::ComputedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AggregationControl::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AggregationControl::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AggregationControl::LastRunMs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AggregationControl::DebounceScheduled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(AggregationControl::DebouncedAtMs).big_integer())
                    .col(
                        ColumnDef::new(AggregationControl::Version)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AggregationControl::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AggregateSnapshot::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ChoiceCounter::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ChoiceCounter {
    Table,
    Key,
    Count,
    UpdatedAt,
}

#[derive(Iden)]
enum AggregateSnapshot {
    Table,
    Id,
    Counters,
    TotalResponses,
    Generation,
    ComputedAt,
}

#[derive(Iden)]
enum AggregationControl {
    Table,
    Id,
    LastRunMs,
    DebounceScheduled,
    DebouncedAtMs,
    Version,
}
