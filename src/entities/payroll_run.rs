//! Payroll run entity - One payroll for a period, optionally scoped to a department.
//!
//! The `status` column is the run's only concurrency guard: every workflow transition
//! is applied as a conditional update against the expected prior status.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Workflow status of a payroll run
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum PayrollStatus {
    /// Being prepared; may be recomputed freely
    #[sea_orm(string_value = "draft")]
    Draft,
    /// Submitted for approval
    #[sea_orm(string_value = "pending_review")]
    PendingReview,
    /// Approved, awaiting processing
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Payslips generated; locked until reopened
    #[sea_orm(string_value = "processed")]
    Processed,
}

impl PayrollStatus {
    /// Database representation of the status
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Processed => "processed",
        }
    }

    /// A processed run rejects recomputation and payslip mutation.
    #[must_use]
    pub const fn is_locked(self) -> bool {
        matches!(self, Self::Processed)
    }
}

impl std::fmt::Display for PayrollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payroll run database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payroll_runs")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Pay period in `YYYY-MM` form
    pub period: String,
    /// Department scope; `None` covers every department
    pub department: Option<String>,
    /// Workflow status
    pub status: PayrollStatus,
    /// Number of payslips in the run
    pub staff_count: i32,
    /// Sum of payslip gross pay
    pub gross_amount: f64,
    /// Sum of payslip total deductions
    pub total_deductions: f64,
    /// Sum of payslip net pay
    pub net_amount: f64,
    /// User who created the run
    pub created_by: String,
    /// User who approved the run
    pub approved_by: Option<String>,
    /// When the run was processed
    pub processed_at: Option<DateTimeUtc>,
    /// When the run was created
    pub created_at: DateTimeUtc,
    /// When the run last changed
    pub updated_at: DateTimeUtc,
}

/// Payroll run relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One run has many payslips
    #[sea_orm(has_many = "super::payslip::Entity")]
    Payslips,
}

impl Related<super::payslip::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payslips.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
