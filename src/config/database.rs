//! Database configuration module.
//!
//! This module handles the database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Composite uniqueness that the entity
//! macros cannot express (one balance per staff/type/year, one accrual per month, and so on)
//! is added as explicit indexes.

use crate::entities::{
    AllowanceRule, AuditLog, Cooperative, DeductionApplication, DeductionRule,
    IndividualAllowance, IndividualDeduction, LeaveAccrual, LeaveBalance, LeaveRequest,
    LeaveType, Loan, PayrollRun, Payslip, SalaryStructure, Staff, deduction_application,
    leave_accrual, leave_balance, payslip, salary_structure,
};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info, instrument};

/// Default database location used when `DATABASE_URL` is not set.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/payroll.sqlite?mode=rwc";

/// Gets the database URL from the environment or returns the default `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection using the `DATABASE_URL` environment variable.
///
/// The engine only talks to the returned connection through `SeaORM`, so any backend
/// `SeaORM` supports can stand behind it.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to database at {database_url}");
    Database::connect(&database_url).await.map_err(Into::into)
}

/// Creates all tables and indexes if they do not exist yet.
#[instrument(skip(db))]
pub async fn create_tables<C>(db: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    // Referenced tables first
    create_table(db, &schema, Staff).await?;
    create_table(db, &schema, SalaryStructure).await?;
    create_table(db, &schema, AllowanceRule).await?;
    create_table(db, &schema, DeductionRule).await?;
    create_table(db, &schema, Cooperative).await?;
    create_table(db, &schema, PayrollRun).await?;
    create_table(db, &schema, Payslip).await?;
    create_table(db, &schema, LeaveType).await?;
    create_table(db, &schema, LeaveBalance).await?;
    create_table(db, &schema, LeaveRequest).await?;
    create_table(db, &schema, LeaveAccrual).await?;
    create_table(db, &schema, Loan).await?;
    create_table(db, &schema, IndividualAllowance).await?;
    create_table(db, &schema, IndividualDeduction).await?;
    create_table(db, &schema, DeductionApplication).await?;
    create_table(db, &schema, AuditLog).await?;

    for index in unique_indexes() {
        db.execute(builder.build(&index)).await?;
    }

    info!("Database tables ensured");
    Ok(())
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

fn unique_indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("idx_salary_structure_grade_step")
            .table(SalaryStructure)
            .col(salary_structure::Column::GradeLevel)
            .col(salary_structure::Column::Step)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_payslip_run_staff")
            .table(Payslip)
            .col(payslip::Column::PayrollRunId)
            .col(payslip::Column::StaffId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_leave_balance_staff_type_year")
            .table(LeaveBalance)
            .col(leave_balance::Column::StaffId)
            .col(leave_balance::Column::LeaveTypeId)
            .col(leave_balance::Column::Year)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_leave_accrual_staff_type_period")
            .table(LeaveAccrual)
            .col(leave_accrual::Column::StaffId)
            .col(leave_accrual::Column::LeaveTypeId)
            .col(leave_accrual::Column::Period)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_deduction_application_deduction_period")
            .table(DeductionApplication)
            .col(deduction_application::Column::DeductionId)
            .col(deduction_application::Column::Period)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}
