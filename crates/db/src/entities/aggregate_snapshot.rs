//! Aggregate snapshot entity (single row, id `live`).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Primary key of the only snapshot row.
pub const LIVE_ID: &str = "live";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "aggregate_snapshot")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Counter key to count (JSON object)
    #[sea_orm(column_type = "Json")]
    pub counters: JsonValue,

    pub total_responses: i64,

    /// Control-state version of the recount that produced this row
    pub generation: i64,

    pub computed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
