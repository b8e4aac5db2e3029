//! Cooperative organisation entity - A staff cooperative society receiving contributions.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Cooperative organisation database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cooperative_organizations")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Society name
    #[sea_orm(unique)]
    pub name: String,
    /// Inactive societies cannot receive new deductions
    pub is_active: bool,
}

/// Cooperatives are referenced by individual deductions only
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
