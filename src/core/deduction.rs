//! Deduction calculator - statutory deductions, PAYE and ad-hoc totals.

use super::round_money;
use super::tax::{TaxTable, calculate_paye_with};
use crate::entities::{DeductionRule, RuleKind, deduction_rule};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, EntityTrait};
use std::collections::BTreeMap;

/// Breakdown key for the PAYE entry added when no tax rule is configured
pub const PAYE_KEY: &str = "paye";
/// Breakdown key for loan repayments
pub const LOAN_REPAYMENT_KEY: &str = "loan_repayment";
/// Breakdown key for cooperative contributions
pub const COOPERATIVE_KEY: &str = "cooperative_deduction";

fn is_tax_rule(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("paye") || name.contains("tax")
}

/// Computes the deduction breakdown under the statutory tax table.
#[must_use]
pub fn calculate_deductions(
    basic_salary: f64,
    gross_pay: f64,
    rules: &[deduction_rule::Model],
    loans: f64,
    cooperatives: f64,
) -> BTreeMap<String, f64> {
    calculate_deductions_with(
        &TaxTable::statutory(),
        basic_salary,
        gross_pay,
        rules,
        loans,
        cooperatives,
    )
}

/// Computes the deduction breakdown.
///
/// Tax rules (name containing "paye" or "tax") deduct PAYE on gross pay. Percentage
/// rules apply to basic salary for NHF and to gross pay otherwise. PAYE is statutory,
/// so it is added under [`PAYE_KEY`] even when no active tax rule exists. Loan and
/// cooperative totals are appended when positive.
#[must_use]
pub fn calculate_deductions_with(
    tax_table: &TaxTable,
    basic_salary: f64,
    gross_pay: f64,
    rules: &[deduction_rule::Model],
    loans: f64,
    cooperatives: f64,
) -> BTreeMap<String, f64> {
    let mut deductions = BTreeMap::new();
    let mut has_tax_rule = false;

    for rule in rules.iter().filter(|rule| rule.is_active) {
        let amount = if is_tax_rule(&rule.name) {
            has_tax_rule = true;
            calculate_paye_with(tax_table, gross_pay)
        } else {
            match rule.kind {
                RuleKind::Percentage => {
                    let base = if rule.name.to_lowercase().contains("nhf") {
                        basic_salary
                    } else {
                        gross_pay
                    };
                    base * (rule.value / 100.0)
                }
                RuleKind::Fixed => rule.value,
            }
        };
        deductions.insert(rule.name.clone(), round_money(amount));
    }

    if !has_tax_rule {
        deductions.insert(
            PAYE_KEY.to_string(),
            calculate_paye_with(tax_table, gross_pay),
        );
    }
    if loans > 0.0 {
        deductions.insert(LOAN_REPAYMENT_KEY.to_string(), round_money(loans));
    }
    if cooperatives > 0.0 {
        deductions.insert(COOPERATIVE_KEY.to_string(), round_money(cooperatives));
    }

    deductions
}

/// Sum of a deduction breakdown.
#[must_use]
pub fn total_deductions(deductions: &BTreeMap<String, f64>) -> f64 {
    round_money(deductions.values().sum())
}

/// Loads every deduction rule.
pub async fn get_deduction_rules<C>(db: &C) -> Result<Vec<deduction_rule::Model>>
where
    C: ConnectionTrait,
{
    DeductionRule::find().all(db).await.map_err(Into::into)
}
