//! Staff entity - A member of staff on the payroll.
//!
//! Grade level and step are the two coordinates into the salary structure table
//! that determine the basic salary.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Employment status of a staff member
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum StaffStatus {
    /// Currently employed and working
    #[sea_orm(string_value = "active")]
    Active,
    /// Employed but on an extended leave
    #[sea_orm(string_value = "on_leave")]
    OnLeave,
    /// Retired
    #[sea_orm(string_value = "retired")]
    Retired,
    /// Employment ended
    #[sea_orm(string_value = "terminated")]
    Terminated,
}

impl StaffStatus {
    /// Whether staff in this status are paid in a payroll run.
    #[must_use]
    pub const fn is_payable(self) -> bool {
        matches!(self, Self::Active | Self::OnLeave)
    }
}

/// Staff database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "staff")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Organisation-issued staff number
    #[sea_orm(unique)]
    pub staff_number: String,
    /// Full name
    pub full_name: String,
    /// Department the staff member belongs to, if any
    pub department: Option<String>,
    /// Job title (used by position-dependent allowances)
    pub position: String,
    /// Grade level, 1 to 17
    pub grade_level: i32,
    /// Step within the grade level, 1 to 15
    pub step: i32,
    /// Employment status
    pub status: StaffStatus,
    /// When the record was created
    pub created_at: DateTimeUtc,
}

/// Staff relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One staff member has many payslips
    #[sea_orm(has_many = "super::payslip::Entity")]
    Payslips,
    /// One staff member has many loans
    #[sea_orm(has_many = "super::loan::Entity")]
    Loans,
}

impl Related<super::payslip::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payslips.def()
    }
}

impl Related<super::loan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Loans.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
