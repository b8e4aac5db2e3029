//! Deduction rule entity - A standing statutory or organisational deduction.

use super::RuleKind;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Deduction rule database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deduction_rules")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Deduction name; also the key in the payslip breakdown
    #[sea_orm(unique)]
    pub name: String,
    /// Percentage or fixed amount
    pub kind: RuleKind,
    /// Percentage (0-100) or fixed amount depending on `kind`
    pub value: f64,
    /// Inactive rules are ignored by the calculator
    pub is_active: bool,
}

/// Deduction rules have no relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
