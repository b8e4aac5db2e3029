//! Salary & allowance calculator.
//!
//! Basic salary comes from the salary structure table keyed by grade level and step.
//! Allowances are computed from the active allowance rules with a couple of
//! position- and grade-dependent modifiers.

use super::round_money;
use crate::{
    config::Settings,
    entities::{RuleKind, SalaryStructure, allowance_rule, salary_structure},
    errors::{Error, Result},
};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Highest grade level on the scale
pub const MAX_GRADE_LEVEL: i32 = 17;
/// Highest step within a grade level
pub const MAX_STEP: i32 = 15;

/// Where a resolved basic salary came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SalarySource {
    /// The salary structure table
    Table,
    /// The fallback formula, because the table had no entry
    Fallback,
}

/// A basic salary together with its provenance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SalaryResolution {
    /// Monthly basic salary
    pub amount: f64,
    /// Whether the amount is authoritative or degraded
    pub source: SalarySource,
}

/// Rejects grade/step pairs outside the scale.
pub fn validate_grade_step(grade_level: i32, step: i32) -> Result<()> {
    if !(1..=MAX_GRADE_LEVEL).contains(&grade_level) {
        return Err(Error::validation(format!(
            "Grade level must be between 1 and {MAX_GRADE_LEVEL}, got {grade_level}"
        )));
    }
    if !(1..=MAX_STEP).contains(&step) {
        return Err(Error::validation(format!(
            "Step must be between 1 and {MAX_STEP}, got {step}"
        )));
    }
    Ok(())
}

/// Looks up the basic salary for a grade level and step.
///
/// # Errors
/// [`Error::Validation`] for a pair outside the scale, [`Error::NotFound`] when the
/// pair has no row in the salary structure table.
pub async fn get_basic_salary<C>(db: &C, grade_level: i32, step: i32) -> Result<f64>
where
    C: ConnectionTrait,
{
    validate_grade_step(grade_level, step)?;
    SalaryStructure::find()
        .filter(salary_structure::Column::GradeLevel.eq(grade_level))
        .filter(salary_structure::Column::Step.eq(step))
        .one(db)
        .await?
        .map(|row| row.basic_salary)
        .ok_or_else(|| Error::not_found("Salary structure", format!("GL{grade_level}/S{step}")))
}

/// Deterministic stand-in for a missing salary structure row:
/// `(30,000 + (grade - 1) x 15,000) x (1 + 3% x (step - 1))`.
#[must_use]
pub fn fallback_basic_salary(grade_level: i32, step: i32) -> f64 {
    let grade_base = 30_000.0 + f64::from(grade_level - 1) * 15_000.0;
    round_money(grade_base * (1.0 + 0.03 * f64::from(step - 1)))
}

/// Resolves the basic salary, using the fallback formula only when the settings allow it.
/// A fallback is always logged and flagged in the returned [`SalarySource`].
pub async fn resolve_basic_salary<C>(
    db: &C,
    settings: &Settings,
    grade_level: i32,
    step: i32,
) -> Result<SalaryResolution>
where
    C: ConnectionTrait,
{
    match get_basic_salary(db, grade_level, step).await {
        Ok(amount) => Ok(SalaryResolution {
            amount,
            source: SalarySource::Table,
        }),
        Err(Error::NotFound { .. }) if settings.payroll.allow_salary_fallback => {
            let amount = fallback_basic_salary(grade_level, step);
            warn!(
                grade_level,
                step, amount, "Salary structure entry missing, using fallback formula"
            );
            Ok(SalaryResolution {
                amount,
                source: SalarySource::Fallback,
            })
        }
        Err(e) => Err(e),
    }
}

/// Computes the allowance breakdown for one staff member.
///
/// Percentage rules apply to basic salary. A rule whose name contains "responsibility"
/// is scaled by 1.5 from grade level 15 and by 1.2 from grade level 10. A rule whose name
/// contains "hazard" pays nothing unless the position mentions "field" or "rural".
#[must_use]
pub fn calculate_allowances(
    basic_salary: f64,
    rules: &[allowance_rule::Model],
    grade_level: i32,
    position: &str,
) -> BTreeMap<String, f64> {
    let position = position.to_lowercase();
    let hazard_eligible = position.contains("field") || position.contains("rural");

    rules
        .iter()
        .filter(|rule| rule.is_active)
        .map(|rule| {
            let mut amount = match rule.kind {
                RuleKind::Percentage => basic_salary * (rule.value / 100.0),
                RuleKind::Fixed => rule.value,
            };

            let name = rule.name.to_lowercase();
            if name.contains("responsibility") {
                if grade_level >= 15 {
                    amount *= 1.5;
                } else if grade_level >= 10 {
                    amount *= 1.2;
                }
            } else if name.contains("hazard") && !hazard_eligible {
                amount = 0.0;
            }

            (rule.name.clone(), round_money(amount))
        })
        .collect()
}

/// Sum of an allowance breakdown.
#[must_use]
pub fn total_allowances(allowances: &BTreeMap<String, f64>) -> f64 {
    round_money(allowances.values().sum())
}

/// Loads every allowance rule.
pub async fn get_allowance_rules<C>(db: &C) -> Result<Vec<allowance_rule::Model>>
where
    C: ConnectionTrait,
{
    crate::entities::AllowanceRule::find()
        .all(db)
        .await
        .map_err(Into::into)
}
