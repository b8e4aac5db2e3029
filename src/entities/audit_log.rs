//! Audit log entity - Append-only record of every mutating operation.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Audit log database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_logs")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User who performed the action
    pub actor_id: String,
    /// Action name, e.g. `"payroll_run.approve"`
    pub action: String,
    /// Table or resource kind affected
    pub resource: String,
    /// Identifier of the affected record
    pub resource_id: String,
    /// JSON snapshot of the changed fields before the action
    pub old_values: Option<String>,
    /// JSON snapshot of the changed fields after the action
    pub new_values: Option<String>,
    /// When the action happened
    pub created_at: DateTimeUtc,
}

/// Audit entries are standalone
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
