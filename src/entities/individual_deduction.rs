//! Individual deduction entity - A recurring or one-off deduction for a single staff member.
//!
//! Loan-linked deductions drive the loan's own balance down when applied. Other deductions
//! may carry a `total_amount` whose un-recovered part is tracked in `remaining_balance`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// What an individual deduction recovers
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DeductionKind {
    /// Loan repayment
    #[sea_orm(string_value = "loan")]
    Loan,
    /// Cooperative society contribution
    #[sea_orm(string_value = "cooperative")]
    Cooperative,
    /// Any other ad-hoc deduction
    #[sea_orm(string_value = "other")]
    Other,
}

/// Lifecycle of an individual deduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DeductionStatus {
    /// Deducted each period in range
    #[sea_orm(string_value = "active")]
    Active,
    /// Fully recovered
    #[sea_orm(string_value = "paid_off")]
    PaidOff,
    /// Withdrawn
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Individual deduction database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "individual_deductions")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Staff member paying the deduction
    pub staff_id: i64,
    /// Kind of deduction
    pub kind: DeductionKind,
    /// Description shown on the payslip for `Other` deductions
    pub description: String,
    /// Amount deducted per period
    pub amount: f64,
    /// Total to recover across periods, if bounded
    pub total_amount: Option<f64>,
    /// Part of `total_amount` not yet recovered
    pub remaining_balance: Option<f64>,
    /// First period, `YYYY-MM`
    pub start_period: String,
    /// Last period, `YYYY-MM`, if bounded
    pub end_period: Option<String>,
    /// Linked loan for repayment deductions
    pub loan_id: Option<i64>,
    /// Applying this deduction applies a loan installment
    pub is_loan_repayment: bool,
    /// Cooperative society receiving the contribution
    pub cooperative_id: Option<i64>,
    /// Lifecycle status
    pub status: DeductionStatus,
    /// When the entry was recorded
    pub created_at: DateTimeUtc,
}

/// Individual deduction relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each deduction belongs to one staff member
    #[sea_orm(
        belongs_to = "super::staff::Entity",
        from = "Column::StaffId",
        to = "super::staff::Column::Id"
    )]
    Staff,
    /// Periods the deduction has been recovered in
    #[sea_orm(has_many = "super::deduction_application::Entity")]
    Applications,
}

impl Related<super::deduction_application::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Applications.def()
    }
}

impl Related<super::staff::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Staff.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
