//! Core business logic - framework-agnostic payroll, leave, loan and adjustment operations.
//!
//! The calculators (`tax`, `salary`, `deduction`) are pure. The ledgers and the payroll
//! orchestrator take a `SeaORM` connection as their persistence port.

pub mod adjustment;
pub mod deduction;
pub mod effects;
pub mod leave;
pub mod loan;
pub mod payroll;
pub mod period;
pub mod role;
pub mod salary;
pub mod staff;
pub mod tax;
pub mod workflow;

/// Rounds a monetary amount to kobo (two decimal places).
#[must_use]
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
