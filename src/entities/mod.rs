//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod allowance_rule;
pub mod audit_log;
pub mod cooperative;
pub mod deduction_application;
pub mod deduction_rule;
pub mod individual_allowance;
pub mod individual_deduction;
pub mod leave_accrual;
pub mod leave_balance;
pub mod leave_request;
pub mod leave_type;
pub mod loan;
pub mod payroll_run;
pub mod payslip;
pub mod salary_structure;
pub mod staff;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How an allowance or deduction rule's `value` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// `value` is a percentage of a base amount
    #[sea_orm(string_value = "percentage")]
    Percentage,
    /// `value` is the amount itself
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

// Re-export specific types to avoid conflicts
pub use allowance_rule::{Entity as AllowanceRule, Model as AllowanceRuleModel};
pub use audit_log::{Entity as AuditLog, Model as AuditLogModel};
pub use cooperative::{Entity as Cooperative, Model as CooperativeModel};
pub use deduction_application::{
    Entity as DeductionApplication, Model as DeductionApplicationModel,
};
pub use deduction_rule::{Entity as DeductionRule, Model as DeductionRuleModel};
pub use individual_allowance::{
    Entity as IndividualAllowance, Model as IndividualAllowanceModel,
};
pub use individual_deduction::{
    Entity as IndividualDeduction, Model as IndividualDeductionModel,
};
pub use leave_accrual::{Entity as LeaveAccrual, Model as LeaveAccrualModel};
pub use leave_balance::{Entity as LeaveBalance, Model as LeaveBalanceModel};
pub use leave_request::{Entity as LeaveRequest, Model as LeaveRequestModel};
pub use leave_type::{Entity as LeaveType, Model as LeaveTypeModel};
pub use loan::{Entity as Loan, Model as LoanModel};
pub use payroll_run::{Entity as PayrollRun, Model as PayrollRunModel};
pub use payslip::{Entity as Payslip, Model as PayslipModel};
pub use salary_structure::{Entity as SalaryStructure, Model as SalaryStructureModel};
pub use staff::{Entity as Staff, Model as StaffModel};
