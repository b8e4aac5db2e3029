//! Leave type entity - Annual, sick, maternity and other kinds of leave.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Leave type database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "leave_types")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name, e.g. "Annual Leave"
    #[sea_orm(unique)]
    pub name: String,
    /// Paid leave draws from a balance; unpaid leave never does
    pub is_paid: bool,
    /// Yearly entitlement cap in days (0 means uncapped)
    pub max_days_per_year: f64,
    /// Days credited per month by the accrual batch (0 means front-loaded)
    pub accrual_rate: f64,
    /// Requests need a reviewer; otherwise they are approved on submission
    pub requires_approval: bool,
    /// Inactive types cannot be requested or accrued
    pub is_active: bool,
}

/// Leave types are referenced by balances and requests
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One leave type has many balances
    #[sea_orm(has_many = "super::leave_balance::Entity")]
    Balances,
}

impl Related<super::leave_balance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Balances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
