//! Salary structure entity - The (grade level, step) to basic salary lookup table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One cell of the salary scale
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "salary_structures")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Grade level, 1 to 17
    pub grade_level: i32,
    /// Step, 1 to 15
    pub step: i32,
    /// Monthly basic salary for this grade and step
    pub basic_salary: f64,
}

/// The salary scale is a standalone lookup table
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
