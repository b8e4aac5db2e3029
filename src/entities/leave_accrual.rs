//! Leave accrual entity - One row per (staff, leave type, month) credited by the accrual batch.
//! The unique index on those three columns is what makes re-running a month a no-op.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Leave accrual ledger model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "leave_accruals")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Staff member credited
    pub staff_id: i64,
    /// Leave type credited
    pub leave_type_id: i64,
    /// Month credited, `YYYY-MM`
    pub period: String,
    /// Days actually credited (after the yearly cap)
    pub days: f64,
    /// When the credit was recorded
    pub created_at: DateTimeUtc,
}

/// Accrual entries are standalone
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
