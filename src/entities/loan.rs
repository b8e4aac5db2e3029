//! Loan entity - A staff loan repaid in monthly installments through payroll.
//!
//! Loans are never physically deleted; cancellation is a status change.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How interest is charged on a loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum InterestMethod {
    /// Simple interest on the original principal for the whole term
    #[sea_orm(string_value = "flat")]
    Flat,
    /// Interest recomputed on the outstanding balance each month
    #[sea_orm(string_value = "reducing")]
    Reducing,
}

impl std::str::FromStr for InterestMethod {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "reducing" | "reducing_balance" => Ok(Self::Reducing),
            other => Err(crate::errors::Error::validation(format!(
                "Unknown interest method '{other}'"
            ))),
        }
    }
}

/// Lifecycle status of a loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// Being repaid
    #[sea_orm(string_value = "active")]
    Active,
    /// Fully repaid
    #[sea_orm(string_value = "paid_off")]
    PaidOff,
    /// Written off or withdrawn by an administrator
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Loan database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "loans")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Borrowing staff member
    pub staff_id: i64,
    /// Amount lent
    pub principal: f64,
    /// Annual interest rate in percent
    pub interest_rate: f64,
    /// Interest method
    pub method: InterestMethod,
    /// Number of monthly installments in the term
    pub number_of_installments: i32,
    /// Installments applied so far
    pub installments_paid: i32,
    /// Principal component of a regular installment
    pub monthly_principal: f64,
    /// Interest component of a regular installment
    pub monthly_interest: f64,
    /// Regular installment amount
    pub monthly_total: f64,
    /// Interest over the whole term
    pub total_interest: f64,
    /// Principal not yet recovered
    pub remaining_balance: f64,
    /// Lifecycle status
    pub status: LoanStatus,
    /// First pay period repayments are deducted in, `YYYY-MM`
    pub start_period: String,
    /// When the loan was recorded
    pub created_at: DateTimeUtc,
}

/// Loan relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each loan belongs to one staff member
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
