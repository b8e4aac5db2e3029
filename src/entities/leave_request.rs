//! Leave request entity - A staff member's request for time off.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status of a leave request. Only `Pending` can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum LeaveStatus {
    /// Awaiting review
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Granted; the balance has been debited
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Declined by a reviewer
    #[sea_orm(string_value = "rejected")]
    Rejected,
    /// Withdrawn before review
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl LeaveStatus {
    /// Database representation of the status
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leave request database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "leave_requests")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Requesting staff member
    pub staff_id: i64,
    /// Kind of leave requested
    pub leave_type_id: i64,
    /// First day of leave (inclusive)
    pub start_date: Date,
    /// Last day of leave (inclusive)
    pub end_date: Date,
    /// Working days between the two dates
    pub total_days: i32,
    /// Free-text reason
    pub reason: Option<String>,
    /// Review status
    pub status: LeaveStatus,
    /// User who reviewed or cancelled the request
    pub reviewed_by: Option<String>,
    /// When the request left `Pending`
    pub reviewed_at: Option<DateTimeUtc>,
    /// When the request was submitted
    pub created_at: DateTimeUtc,
}

/// Leave request relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each request belongs to one staff member
    #[sea_orm(
        belongs_to = "super::staff::Entity",
        from = "Column::StaffId",
        to = "super::staff::Column::Id"
    )]
    Staff,
    /// Each request is for one leave type
    #[sea_orm(
        belongs_to = "super::leave_type::Entity",
        from = "Column::LeaveTypeId",
        to = "super::leave_type::Column::Id"
    )]
    LeaveType,
}

impl Related<super::staff::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Staff.def()
    }
}

impl Related<super::leave_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LeaveType.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
