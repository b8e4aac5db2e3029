//! Payslip entity - The computed pay of one staff member in one payroll run.
//!
//! The allowance and deduction breakdowns are stored as JSON objects of name to amount.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Payslip database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payslips")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Run this payslip belongs to
    pub payroll_run_id: i64,
    /// Staff member being paid
    pub staff_id: i64,
    /// Pay period in `YYYY-MM` form
    pub period: String,
    /// Basic salary from the salary structure
    pub basic_salary: f64,
    /// JSON object of allowance name to amount
    pub allowances: String,
    /// Arrears paid this period
    pub arrears: f64,
    /// Overtime paid this period
    pub overtime: f64,
    /// Bonus paid this period
    pub bonus: f64,
    /// JSON object of deduction name to amount
    pub deductions: String,
    /// Basic plus allowances, arrears, overtime and bonus
    pub gross_pay: f64,
    /// Sum of all deductions
    pub total_deductions: f64,
    /// Gross pay minus total deductions
    pub net_pay: f64,
    /// When the payslip was generated
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Decodes the stored allowance breakdown.
    pub fn allowance_breakdown(&self) -> crate::errors::Result<BTreeMap<String, f64>> {
        Ok(serde_json::from_str(&self.allowances)?)
    }

    /// Decodes the stored deduction breakdown.
    pub fn deduction_breakdown(&self) -> crate::errors::Result<BTreeMap<String, f64>> {
        Ok(serde_json::from_str(&self.deductions)?)
    }
}

/// Payslip relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each payslip belongs to one payroll run
    #[sea_orm(
        belongs_to = "super::payroll_run::Entity",
        from = "Column::PayrollRunId",
        to = "super::payroll_run::Column::Id"
    )]
    PayrollRun,
    /// Each payslip belongs to one staff member
    #[sea_orm(
        belongs_to = "super::staff::Entity",
        from = "Column::StaffId",
        to = "super::staff::Column::Id"
    )]
    Staff,
}

impl Related<super::payroll_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PayrollRun.def()
    }
}

impl Related<super::staff::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Staff.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
