//! Aggregation control state entity (single row, id `aggregate`).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Primary key of the only control row.
pub const CONTROL_ID: &str = "aggregate";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "aggregation_control")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Epoch milliseconds of the last claimed recount
    pub last_run_ms: i64,

    pub debounce_scheduled: bool,

    /// Epoch milliseconds at which the pending recount should fire
    #[sea_orm(nullable)]
    pub debounced_at_ms: Option<i64>,

    /// Bumped by every transition; compare-and-swap key
    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
