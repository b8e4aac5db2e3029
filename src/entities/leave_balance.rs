//! Leave balance entity - Per staff, per leave type, per year entitlement.
//!
//! `remaining_days` is always `accrued_days + carried_forward - used_days` and never negative.
//! Every update touches `remaining_days` in the same statement as the field it derives from.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Leave balance database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "leave_balances")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Staff member owning the balance
    pub staff_id: i64,
    /// Leave type of the balance
    pub leave_type_id: i64,
    /// Calendar year the balance covers
    pub year: i32,
    /// Days earned this year
    pub accrued_days: f64,
    /// Days taken this year
    pub used_days: f64,
    /// Days brought over from the previous year
    pub carried_forward: f64,
    /// Days still available
    pub remaining_days: f64,
}

impl Model {
    /// Whether the stored remaining days agree with the other three columns.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let expected = self.accrued_days + self.carried_forward - self.used_days;
        (expected - self.remaining_days).abs() < 1e-9 && self.remaining_days >= 0.0
    }
}

/// Leave balance relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each balance belongs to one staff member
    #[sea_orm(
        belongs_to = "super::staff::Entity",
        from = "Column::StaffId",
        to = "super::staff::Column::Id"
    )]
    Staff,
    /// Each balance belongs to one leave type
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
