//! Individual allowance entity - A one-off payment to a single staff member for one period.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// What an individual allowance pays for
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum AllowanceKind {
    /// Back pay owed from earlier periods
    #[sea_orm(string_value = "arrears")]
    Arrears,
    /// Overtime worked
    #[sea_orm(string_value = "overtime")]
    Overtime,
    /// Bonus payment
    #[sea_orm(string_value = "bonus")]
    Bonus,
    /// Any other ad-hoc allowance, listed by description on the payslip
    #[sea_orm(string_value = "other")]
    Other,
}

/// Lifecycle of an individual allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum AllowanceStatus {
    /// Waiting for the period's payroll
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Paid in a processed run
    #[sea_orm(string_value = "applied")]
    Applied,
    /// Withdrawn
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Individual allowance database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "individual_allowances")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Staff member receiving the allowance
    pub staff_id: i64,
    /// Kind of payment
    pub kind: AllowanceKind,
    /// Description shown on the payslip for `Other` allowances
    pub description: String,
    /// Amount paid
    pub amount: f64,
    /// Pay period, `YYYY-MM`
    pub period: String,
    /// Lifecycle status
    pub status: AllowanceStatus,
    /// Run that paid the allowance
    pub applied_run_id: Option<i64>,
    /// When the entry was recorded
    pub created_at: DateTimeUtc,
}

/// Individual allowance relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each allowance belongs to one staff member
    #[sea_orm(
        belongs_to = "super::staff::Entity",
        from = "Column::StaffId",
        to = "super::staff::Column::Id"
    )]
    Staff,
}

impl Related<super::staff::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Staff.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
