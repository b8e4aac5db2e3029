//! Deduction application entity - One row per (individual deduction, period) recovered by
//! a processed payroll run.
//!
//! The unique index on those two columns is what keeps a reprocessed period from
//! recovering the same deduction twice, whatever order periods are processed in.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Deduction application ledger model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deduction_applications")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Deduction that was applied
    pub deduction_id: i64,
    /// Staff member it was charged to
    pub staff_id: i64,
    /// Period recovered, `YYYY-MM`
    pub period: String,
    /// Amount recovered in that period
    pub amount: f64,
    /// Run that first applied it
    pub payroll_run_id: i64,
    /// When it was applied
    pub created_at: DateTimeUtc,
}

/// Deduction application relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each application belongs to one individual deduction
    #[sea_orm(
        belongs_to = "super::individual_deduction::Entity",
        from = "Column::DeductionId",
        to = "super::individual_deduction::Column::Id"
    )]
    IndividualDeduction,
}

impl Related<super::individual_deduction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IndividualDeduction.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
