//! Shared test utilities for the payroll engine.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test records with sensible defaults.

#![allow(clippy::unwrap_used)]

use crate::{
    core::{loan::NewLoan, period::Period, role::Actor, role::Role},
    entities::{
        self, AuditLog, LeaveType, RuleKind, Staff, allowance_rule, audit_log, cooperative,
        deduction_rule, leave_type, loan::InterestMethod, payroll_run,
        payroll_run::PayrollStatus, salary_structure, staff, staff::StaffStatus,
    },
    errors::{Error, Result},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// A payroll admin acting as user `payroll`.
pub fn payroll_admin() -> Actor {
    Actor::new("payroll", Role::PayrollAdmin)
}

/// An account admin acting as user `accounts`.
pub fn account_admin() -> Actor {
    Actor::new("accounts", Role::AccountAdmin)
}

/// A super admin acting as user `root`.
pub fn super_admin() -> Actor {
    Actor::new("root", Role::SuperAdmin)
}

/// Creates a test staff member with sensible defaults.
///
/// # Defaults
/// * department: "Operations"
/// * position: "Field Officer"
/// * grade level 10, step 5
/// * status: active
pub async fn create_test_staff(
    db: &DatabaseConnection,
    staff_number: &str,
) -> Result<entities::StaffModel> {
    create_custom_staff(db, staff_number, Some("Operations"), "Field Officer", 10, 5).await
}

/// Creates a test staff member with custom parameters.
pub async fn create_custom_staff(
    db: &DatabaseConnection,
    staff_number: &str,
    department: Option<&str>,
    position: &str,
    grade_level: i32,
    step: i32,
) -> Result<entities::StaffModel> {
    staff::ActiveModel {
        staff_number: Set(staff_number.to_string()),
        full_name: Set(format!("Staff {staff_number}")),
        department: Set(department.map(String::from)),
        position: Set(position.to_string()),
        grade_level: Set(grade_level),
        step: Set(step),
        status: Set(StaffStatus::Active),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Changes a staff member's employment status.
pub async fn set_staff_status(
    db: &DatabaseConnection,
    staff_id: i64,
    status: StaffStatus,
) -> Result<()> {
    let member = Staff::find_by_id(staff_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Staff", staff_id))?;
    let mut active: staff::ActiveModel = member.into();
    active.status = Set(status);
    active.update(db).await?;
    Ok(())
}

/// Adds a salary structure row.
pub async fn seed_salary(
    db: &DatabaseConnection,
    grade_level: i32,
    step: i32,
    basic_salary: f64,
) -> Result<()> {
    salary_structure::ActiveModel {
        grade_level: Set(grade_level),
        step: Set(step),
        basic_salary: Set(basic_salary),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

fn allowance_rule_model(name: &str, kind: RuleKind, value: f64) -> allowance_rule::Model {
    allowance_rule::Model {
        id: 0,
        name: name.to_string(),
        kind,
        value,
        is_active: true,
    }
}

fn deduction_rule_model(name: &str, kind: RuleKind, value: f64) -> deduction_rule::Model {
    deduction_rule::Model {
        id: 0,
        name: name.to_string(),
        kind,
        value,
        is_active: true,
    }
}

/// Housing 20% and hazard 10% of basic salary.
pub fn standard_allowance_rules() -> Vec<allowance_rule::Model> {
    vec![
        allowance_rule_model("housing", RuleKind::Percentage, 20.0),
        allowance_rule_model("hazard", RuleKind::Percentage, 10.0),
    ]
}

/// Pension 8% of gross and NHF 2.5% of basic salary. PAYE is added automatically.
pub fn standard_deduction_rules() -> Vec<deduction_rule::Model> {
    vec![
        deduction_rule_model("pension", RuleKind::Percentage, 8.0),
        deduction_rule_model("nhf", RuleKind::Percentage, 2.5),
    ]
}

/// Seeds GL10/S5 at 140,000 with the standard allowance and deduction rules.
pub async fn seed_standard_pay(db: &DatabaseConnection) -> Result<()> {
    seed_salary(db, 10, 5, 140_000.0).await?;
    for rule in standard_allowance_rules() {
        allowance_rule::ActiveModel {
            name: Set(rule.name),
            kind: Set(rule.kind),
            value: Set(rule.value),
            is_active: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }
    for rule in standard_deduction_rules() {
        deduction_rule::ActiveModel {
            name: Set(rule.name),
            kind: Set(rule.kind),
            value: Set(rule.value),
            is_active: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

/// Inserts a draft payroll run directly, bypassing the workflow.
pub async fn create_test_run(
    db: &DatabaseConnection,
    period: &str,
) -> Result<entities::PayrollRunModel> {
    let period: Period = period.parse()?;
    let now = chrono::Utc::now();
    payroll_run::ActiveModel {
        period: Set(period.to_string()),
        department: Set(None),
        status: Set(PayrollStatus::Draft),
        staff_count: Set(0),
        gross_amount: Set(0.0),
        total_deductions: Set(0.0),
        net_amount: Set(0.0),
        created_by: Set("payroll".to_string()),
        approved_by: Set(None),
        processed_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates an active cooperative.
pub async fn create_test_cooperative(
    db: &DatabaseConnection,
    name: &str,
) -> Result<entities::CooperativeModel> {
    cooperative::ActiveModel {
        name: Set(name.to_string()),
        is_active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates an active, paid leave type that requires approval.
pub async fn create_leave_type(
    db: &DatabaseConnection,
    name: &str,
    max_days_per_year: f64,
    accrual_rate: f64,
) -> Result<entities::LeaveTypeModel> {
    leave_type::ActiveModel {
        name: Set(name.to_string()),
        is_paid: Set(true),
        max_days_per_year: Set(max_days_per_year),
        accrual_rate: Set(accrual_rate),
        requires_approval: Set(true),
        is_active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates an active, unpaid leave type without a yearly cap.
pub async fn create_unpaid_leave_type(
    db: &DatabaseConnection,
    name: &str,
) -> Result<entities::LeaveTypeModel> {
    let created = create_leave_type(db, name, 0.0, 0.0).await?;
    let mut active: leave_type::ActiveModel = created.into();
    active.is_paid = Set(false);
    active.update(db).await.map_err(Into::into)
}

/// Switches whether a leave type's requests need review.
pub async fn set_requires_approval(
    db: &DatabaseConnection,
    leave_type_id: i64,
    requires_approval: bool,
) -> Result<()> {
    let current = LeaveType::find_by_id(leave_type_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Leave type", leave_type_id))?;
    let mut active: leave_type::ActiveModel = current.into();
    active.requires_approval = Set(requires_approval);
    active.update(db).await?;
    Ok(())
}

/// A flat-interest loan at 10% a year, starting in 2024-01.
pub fn flat_loan(staff_id: i64, principal: f64, installments: i32) -> NewLoan {
    NewLoan {
        staff_id,
        principal,
        interest_rate: 10.0,
        number_of_installments: installments,
        method: InterestMethod::Flat,
        start_period: Period::new(2024, 1).unwrap(),
    }
}

/// Number of audit entries recorded for an action.
pub async fn audit_count(db: &DatabaseConnection, action: &str) -> Result<u64> {
    AuditLog::find()
        .filter(audit_log::Column::Action.eq(action))
        .count(db)
        .await
        .map_err(Into::into)
}
