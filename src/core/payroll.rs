//! Payroll orchestrator - creates runs, drives them through the workflow and generates
//! payslips.
//!
//! Every status change is a conditional update on the status the run was read in, written
//! together with its audit entry in one transaction. Processing writes the payslips, the
//! adjustment applications, the run aggregates and the status change in that same
//! transaction, so a run is either fully processed or untouched.

use super::adjustment::{
    StaffAdjustments, apply_staff_adjustments, collect_staff_adjustments, release_run_allowances,
};
use super::deduction::{calculate_deductions_with, get_deduction_rules, total_deductions};
use super::effects::{AuditRecord, Outcome, record_audit};
use super::period::Period;
use super::role::{Actor, Capability};
use super::round_money;
use super::salary::{
    SalarySource, calculate_allowances, get_allowance_rules, resolve_basic_salary,
    total_allowances,
};
use super::tax::TaxTable;
use super::workflow::{PayrollAction, WorkflowStep, plan_transition};
use crate::{
    config::Settings,
    entities::{
        PayrollRun, Payslip, allowance_rule, deduction_rule, payroll_run,
        payroll_run::PayrollStatus, payslip, staff,
    },
    errors::{Error, Result},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// One staff member's computed pay, before it is stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayslipDraft {
    /// Staff member paid
    pub staff_id: i64,
    /// Basic salary for the grade and step
    pub basic_salary: f64,
    /// Where the basic salary came from
    pub salary_source: SalarySource,
    /// Rule-based and ad-hoc allowances by name
    pub allowances: BTreeMap<String, f64>,
    /// Back pay from the adjustment ledger
    pub arrears: f64,
    /// Overtime from the adjustment ledger
    pub overtime: f64,
    /// Bonus from the adjustment ledger
    pub bonus: f64,
    /// Statutory, rule-based and ad-hoc deductions by name
    pub deductions: BTreeMap<String, f64>,
    /// Basic salary plus every allowance, arrears, overtime and bonus
    pub gross_pay: f64,
    /// Sum of all deductions
    pub total_deductions: f64,
    /// Gross pay minus total deductions
    pub net_pay: f64,
}

/// Run-level sums over its payslips
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PayrollTotals {
    /// Number of payslips
    pub staff_count: i32,
    /// Sum of gross pay
    pub gross_amount: f64,
    /// Sum of total deductions
    pub total_deductions: f64,
    /// Sum of net pay
    pub net_amount: f64,
}

impl PayrollTotals {
    fn add(&mut self, draft: &PayslipDraft) {
        self.staff_count += 1;
        self.gross_amount = round_money(self.gross_amount + draft.gross_pay);
        self.total_deductions = round_money(self.total_deductions + draft.total_deductions);
        self.net_amount = round_money(self.net_amount + draft.net_pay);
    }
}

/// A staff member left out of a run, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedStaff {
    /// Staff record that could not be paid
    pub staff_id: i64,
    /// Error that stopped the calculation
    pub reason: String,
}

/// Payslips computed for a draft run without storing anything
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayrollPreview {
    /// The run, unchanged
    pub run: payroll_run::Model,
    /// What each payable staff member would be paid
    pub payslips: Vec<PayslipDraft>,
    /// Staff that could not be calculated
    pub skipped: Vec<SkippedStaff>,
    /// What the run aggregates would become
    pub totals: PayrollTotals,
}

/// Result of processing a run
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    /// The run, now processed
    pub run: payroll_run::Model,
    /// Stored payslips
    pub payslips: Vec<payslip::Model>,
    /// Staff that could not be calculated and were left out
    pub skipped: Vec<SkippedStaff>,
}

/// Rules shared by every payslip of a run
struct PayRules {
    tax: TaxTable,
    allowances: Vec<allowance_rule::Model>,
    deductions: Vec<deduction_rule::Model>,
}

impl PayRules {
    async fn load<C>(db: &C, settings: &Settings) -> Result<Self>
    where
        C: ConnectionTrait,
    {
        Ok(Self {
            tax: settings.tax.clone(),
            allowances: get_allowance_rules(db).await?,
            deductions: get_deduction_rules(db).await?,
        })
    }
}

/// Computes a payslip from a basic salary, the active rules and the staff member's
/// ad-hoc adjustments.
///
/// Gross pay is basic salary plus every allowance, arrears, overtime and bonus. PAYE and
/// percentage deductions are charged on that gross; NHF on basic salary.
#[must_use]
pub fn compute_payslip(
    tax_table: &TaxTable,
    staff: &staff::Model,
    basic_salary: f64,
    allowance_rules: &[allowance_rule::Model],
    deduction_rules: &[deduction_rule::Model],
    adjustments: &StaffAdjustments,
) -> PayslipDraft {
    let mut allowances =
        calculate_allowances(basic_salary, allowance_rules, staff.grade_level, &staff.position);
    for (name, amount) in &adjustments.other_allowances {
        let entry = allowances.entry(name.clone()).or_default();
        *entry = round_money(*entry + amount);
    }

    let gross_pay = round_money(
        basic_salary
            + total_allowances(&allowances)
            + adjustments.arrears
            + adjustments.overtime
            + adjustments.bonus,
    );

    let mut deductions = calculate_deductions_with(
        tax_table,
        basic_salary,
        gross_pay,
        deduction_rules,
        adjustments.loans,
        adjustments.cooperatives,
    );
    for (name, amount) in &adjustments.other_deductions {
        let entry = deductions.entry(name.clone()).or_default();
        *entry = round_money(*entry + amount);
    }
    let total = total_deductions(&deductions);

    PayslipDraft {
        staff_id: staff.id,
        basic_salary,
        salary_source: SalarySource::Table,
        allowances,
        arrears: adjustments.arrears,
        overtime: adjustments.overtime,
        bonus: adjustments.bonus,
        deductions,
        gross_pay,
        total_deductions: total,
        net_pay: round_money(gross_pay - total),
    }
}

async fn compute_staff_payslip<C>(
    db: &C,
    settings: &Settings,
    rules: &PayRules,
    member: &staff::Model,
    period: Period,
) -> Result<(PayslipDraft, StaffAdjustments)>
where
    C: ConnectionTrait,
{
    let salary = resolve_basic_salary(db, settings, member.grade_level, member.step).await?;
    let adjustments = collect_staff_adjustments(db, member.id, period).await?;
    let mut draft = compute_payslip(
        &rules.tax,
        member,
        salary.amount,
        &rules.allowances,
        &rules.deductions,
        &adjustments,
    );
    draft.salary_source = salary.source;
    Ok((draft, adjustments))
}

/// Computes every payable staff member in a run's scope. Staff already paid for the period
/// by another run, and calculation failures, are logged and reported as skipped; database
/// failures abort.
async fn compute_run<C>(
    db: &C,
    settings: &Settings,
    run: &payroll_run::Model,
) -> Result<(Vec<(PayslipDraft, StaffAdjustments)>, Vec<SkippedStaff>)>
where
    C: ConnectionTrait,
{
    let period: Period = run.period.parse()?;
    let rules = PayRules::load(db, settings).await?;
    let staff = super::staff::get_payable_staff(db, run.department.as_deref()).await?;
    let paid_elsewhere: BTreeMap<i64, i64> = Payslip::find()
        .filter(payslip::Column::Period.eq(run.period.clone()))
        .filter(payslip::Column::PayrollRunId.ne(run.id))
        .all(db)
        .await?
        .into_iter()
        .map(|payslip| (payslip.staff_id, payslip.payroll_run_id))
        .collect();

    let mut computed = Vec::with_capacity(staff.len());
    let mut skipped = Vec::new();
    for member in &staff {
        if let Some(other_run) = paid_elsewhere.get(&member.id) {
            warn!(
                run_id = run.id,
                staff_id = member.id,
                other_run,
                "Staff member already paid for the period"
            );
            skipped.push(SkippedStaff {
                staff_id: member.id,
                reason: format!("Already paid for {} by payroll run {other_run}", run.period),
            });
            continue;
        }
        match compute_staff_payslip(db, settings, &rules, member, period).await {
            Ok(result) => computed.push(result),
            Err(e) if e.is_calculation_error() => {
                warn!(
                    run_id = run.id,
                    staff_id = member.id,
                    staff_number = %member.staff_number,
                    error = %e,
                    "Skipping staff member"
                );
                skipped.push(SkippedStaff {
                    staff_id: member.id,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok((computed, skipped))
}

/// Loads a payroll run.
pub async fn get_payroll_run<C>(db: &C, run_id: i64) -> Result<payroll_run::Model>
where
    C: ConnectionTrait,
{
    PayrollRun::find_by_id(run_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Payroll run", run_id))
}

/// Lists payroll runs, newest period first, optionally for one period.
pub async fn list_payroll_runs<C>(
    db: &C,
    period: Option<Period>,
) -> Result<Vec<payroll_run::Model>>
where
    C: ConnectionTrait,
{
    let mut query = PayrollRun::find();
    if let Some(period) = period {
        query = query.filter(payroll_run::Column::Period.eq(period.to_string()));
    }
    query
        .order_by_desc(payroll_run::Column::Period)
        .order_by_asc(payroll_run::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Payslips of a processed run, ordered by staff id.
///
/// # Errors
/// [`Error::StateConflict`] while the run is not processed; its payslips do not exist yet.
pub async fn get_payslips_for_run<C>(db: &C, run_id: i64) -> Result<Vec<payslip::Model>>
where
    C: ConnectionTrait,
{
    let run = get_payroll_run(db, run_id).await?;
    if run.status != PayrollStatus::Processed {
        return Err(Error::conflict(format!(
            "Payroll run {run_id} is {}; payslips exist only once it is processed",
            run.status
        )));
    }
    Payslip::find()
        .filter(payslip::Column::PayrollRunId.eq(run_id))
        .order_by_asc(payslip::Column::StaffId)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Whether two runs of the same period could pay the same staff member. A run without a
/// department covers every department.
fn scopes_overlap(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Creates a draft run for a period, optionally scoped to one department.
///
/// # Errors
/// [`Error::StateConflict`] if a run of the same period already covers any of the same
/// staff: the same department, or all departments on either side.
#[instrument(skip(db, actor), fields(actor = %actor.user_id))]
pub async fn create_payroll_run(
    db: &DatabaseConnection,
    actor: &Actor,
    period: Period,
    department: Option<String>,
) -> Result<Outcome<payroll_run::Model>> {
    actor.require(Capability::CreatePayrollRun)?;
    let department = department
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let txn = db.begin().await?;
    let existing = list_payroll_runs(&txn, Some(period)).await?;
    if let Some(run) = existing
        .iter()
        .find(|run| scopes_overlap(run.department.as_deref(), department.as_deref()))
    {
        let scope = run.department.as_deref().unwrap_or("all departments");
        return Err(Error::conflict(format!(
            "Payroll run {} already covers {scope} for {period}",
            run.id
        )));
    }

    let now = chrono::Utc::now();
    let run = payroll_run::ActiveModel {
        period: Set(period.to_string()),
        department: Set(department),
        status: Set(PayrollStatus::Draft),
        staff_count: Set(0),
        gross_amount: Set(0.0),
        total_deductions: Set(0.0),
        net_amount: Set(0.0),
        created_by: Set(actor.user_id.clone()),
        approved_by: Set(None),
        processed_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    record_audit(
        &txn,
        &AuditRecord::new(&actor.user_id, "payroll_run.create", "payroll_runs", run.id).with_new(
            json!({"period": run.period, "department": run.department, "status": run.status}),
        ),
    )
    .await?;
    txn.commit().await?;

    info!(run_id = run.id, period = %run.period, "Payroll run created");
    Ok(Outcome::silent(run))
}

/// Applies a planned step as a compare-and-set on its source status. `totals`, when
/// given, replaces the run aggregates in the same statement.
async fn apply_step<C>(
    db: &C,
    step: &WorkflowStep,
    totals: Option<PayrollTotals>,
) -> Result<payroll_run::Model>
where
    C: ConnectionTrait,
{
    let mut update = payroll_run::ActiveModel {
        status: Set(step.to),
        approved_by: Set(step.approved_by.clone()),
        processed_at: Set(step.processed_at),
        updated_at: Set(chrono::Utc::now()),
        ..Default::default()
    };
    if let Some(totals) = totals {
        update.staff_count = Set(totals.staff_count);
        update.gross_amount = Set(totals.gross_amount);
        update.total_deductions = Set(totals.total_deductions);
        update.net_amount = Set(totals.net_amount);
    }

    let result = PayrollRun::update_many()
        .set(update)
        .filter(payroll_run::Column::Id.eq(step.run_id))
        .filter(payroll_run::Column::Status.eq(step.from))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "Payroll run {} left {} before it could be moved to {}",
            step.run_id, step.from, step.to
        )));
    }
    get_payroll_run(db, step.run_id).await
}

async fn transition(
    db: &DatabaseConnection,
    actor: &Actor,
    run_id: i64,
    action: PayrollAction,
) -> Result<Outcome<payroll_run::Model>> {
    let txn = db.begin().await?;
    let run = get_payroll_run(&txn, run_id).await?;
    let step = plan_transition(&run, action, actor, chrono::Utc::now())?;
    let updated = apply_step(&txn, &step, None).await?;
    record_audit(&txn, &step.audit).await?;
    txn.commit().await?;

    info!(run_id, from = %step.from, to = %step.to, "Payroll run {action}");
    Ok(Outcome::new(updated, step.notifications))
}

/// Sends a draft run for review.
#[instrument(skip(db, actor), fields(actor = %actor.user_id))]
pub async fn submit_payroll_run(
    db: &DatabaseConnection,
    actor: &Actor,
    run_id: i64,
) -> Result<Outcome<payroll_run::Model>> {
    transition(db, actor, run_id, PayrollAction::Submit).await
}

/// Approves a run under review.
#[instrument(skip(db, actor), fields(actor = %actor.user_id))]
pub async fn approve_payroll_run(
    db: &DatabaseConnection,
    actor: &Actor,
    run_id: i64,
) -> Result<Outcome<payroll_run::Model>> {
    transition(db, actor, run_id, PayrollAction::Approve).await
}

/// Returns a run under review to draft.
#[instrument(skip(db, actor), fields(actor = %actor.user_id))]
pub async fn reject_payroll_run(
    db: &DatabaseConnection,
    actor: &Actor,
    run_id: i64,
) -> Result<Outcome<payroll_run::Model>> {
    transition(db, actor, run_id, PayrollAction::Reject).await
}

/// Recomputes a draft run's payslips for review. Nothing is written.
///
/// # Errors
/// [`Error::StateConflict`] unless the run is a draft.
#[instrument(skip(db, settings, actor), fields(actor = %actor.user_id))]
pub async fn rerun_payroll(
    db: &DatabaseConnection,
    settings: &Settings,
    actor: &Actor,
    run_id: i64,
) -> Result<PayrollPreview> {
    actor.require(Capability::RerunPayroll)?;
    let run = get_payroll_run(db, run_id).await?;
    if run.status != PayrollStatus::Draft {
        let reason = if run.status.is_locked() {
            "it is processed and locked until reopened"
        } else {
            "only drafts can be recomputed"
        };
        return Err(Error::conflict(format!(
            "Cannot rerun payroll run {run_id}: {reason}"
        )));
    }

    let (computed, skipped) = compute_run(db, settings, &run).await?;
    let mut totals = PayrollTotals::default();
    let payslips: Vec<PayslipDraft> = computed
        .into_iter()
        .map(|(draft, _)| {
            totals.add(&draft);
            draft
        })
        .collect();

    info!(
        run_id,
        staff = totals.staff_count,
        skipped = skipped.len(),
        "Payroll preview computed"
    );
    Ok(PayrollPreview {
        run,
        payslips,
        skipped,
        totals,
    })
}

/// Processes an approved run: generates a payslip per payable staff member, applies their
/// ad-hoc adjustments, stores the run aggregates and locks the run.
///
/// Staff whose pay cannot be calculated (missing salary scale entry, invalid grade) are
/// skipped and listed in the outcome. Any database failure rolls the whole run back.
#[instrument(skip(db, settings, actor), fields(actor = %actor.user_id))]
pub async fn process_payroll_run(
    db: &DatabaseConnection,
    settings: &Settings,
    actor: &Actor,
    run_id: i64,
) -> Result<Outcome<ProcessOutcome>> {
    let txn = db.begin().await?;
    let run = get_payroll_run(&txn, run_id).await?;
    let mut step = plan_transition(&run, PayrollAction::Process, actor, chrono::Utc::now())?;
    let period: Period = run.period.parse()?;

    let (computed, skipped) = compute_run(&txn, settings, &run).await?;

    let mut totals = PayrollTotals::default();
    let mut payslips = Vec::with_capacity(computed.len());
    for (draft, adjustments) in &computed {
        let stored = payslip::ActiveModel {
            payroll_run_id: Set(run.id),
            staff_id: Set(draft.staff_id),
            period: Set(run.period.clone()),
            basic_salary: Set(draft.basic_salary),
            allowances: Set(serde_json::to_string(&draft.allowances)?),
            arrears: Set(draft.arrears),
            overtime: Set(draft.overtime),
            bonus: Set(draft.bonus),
            deductions: Set(serde_json::to_string(&draft.deductions)?),
            gross_pay: Set(draft.gross_pay),
            total_deductions: Set(draft.total_deductions),
            net_pay: Set(draft.net_pay),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        apply_staff_adjustments(&txn, adjustments, run.id, period).await?;
        totals.add(draft);
        payslips.push(stored);
    }

    let processed = apply_step(&txn, &step, Some(totals)).await?;
    if let Some(values) = step.audit.new_values.as_mut() {
        values["staff_count"] = json!(totals.staff_count);
        values["gross_amount"] = json!(totals.gross_amount);
        values["total_deductions"] = json!(totals.total_deductions);
        values["net_amount"] = json!(totals.net_amount);
        values["skipped"] = json!(skipped.len());
    }
    record_audit(&txn, &step.audit).await?;
    txn.commit().await?;

    info!(
        run_id,
        staff = totals.staff_count,
        skipped = skipped.len(),
        net = totals.net_amount,
        "Payroll run processed"
    );
    Ok(Outcome::new(
        ProcessOutcome {
            run: processed,
            payslips,
            skipped,
        },
        step.notifications,
    ))
}

/// Reopens a processed run: deletes its payslips, zeroes its aggregates, returns its
/// one-off allowances to pending and moves it back to draft.
///
/// Recurring deductions and loan installments already applied for the period stay
/// applied; reprocessing the period charges the same amounts again without recovering
/// them twice.
#[instrument(skip(db, actor), fields(actor = %actor.user_id))]
pub async fn reopen_payroll_run(
    db: &DatabaseConnection,
    actor: &Actor,
    run_id: i64,
) -> Result<Outcome<payroll_run::Model>> {
    let txn = db.begin().await?;
    let run = get_payroll_run(&txn, run_id).await?;
    let mut step = plan_transition(&run, PayrollAction::Reopen, actor, chrono::Utc::now())?;

    let reopened = apply_step(&txn, &step, Some(PayrollTotals::default())).await?;
    let deleted = Payslip::delete_many()
        .filter(payslip::Column::PayrollRunId.eq(run_id))
        .exec(&txn)
        .await?;
    let released = release_run_allowances(&txn, run_id).await?;

    if let Some(values) = step.audit.old_values.as_mut() {
        values["staff_count"] = json!(run.staff_count);
        values["gross_amount"] = json!(run.gross_amount);
        values["total_deductions"] = json!(run.total_deductions);
        values["net_amount"] = json!(run.net_amount);
    }
    if let Some(values) = step.audit.new_values.as_mut() {
        values["payslips_deleted"] = json!(deleted.rows_affected);
        values["allowances_released"] = json!(released);
    }
    record_audit(&txn, &step.audit).await?;
    txn.commit().await?;

    warn!(
        run_id,
        payslips_deleted = deleted.rows_affected,
        allowances_released = released,
        "Processed payroll run reopened"
    );
    Ok(Outcome::new(reopened, step.notifications))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::adjustment::{NewIndividualAllowance, create_individual_allowance};
    use crate::core::loan::{create_loan, get_loan};
    use crate::entities::individual_allowance::{AllowanceKind, AllowanceStatus};
    use crate::entities::{AuditLog, IndividualAllowance, audit_log};
    use crate::test_utils::*;

    fn june() -> Period {
        "2024-06".parse().unwrap()
    }

    /// Takes a fresh June run through create, submit, approve and process.
    async fn process_new_run(
        db: &DatabaseConnection,
        settings: &Settings,
        department: Option<&str>,
    ) -> Result<ProcessOutcome> {
        process_run_for(db, settings, june(), department).await
    }

    async fn process_run_for(
        db: &DatabaseConnection,
        settings: &Settings,
        period: Period,
        department: Option<&str>,
    ) -> Result<ProcessOutcome> {
        let run = create_payroll_run(db, &payroll_admin(), period, department.map(String::from))
            .await?
            .value;
        submit_payroll_run(db, &payroll_admin(), run.id).await?;
        approve_payroll_run(db, &account_admin(), run.id).await?;
        reprocess(db, settings, run.id).await
    }

    /// Submits, approves and processes an existing draft run.
    async fn reprocess(
        db: &DatabaseConnection,
        settings: &Settings,
        run_id: i64,
    ) -> Result<ProcessOutcome> {
        if get_payroll_run(db, run_id).await?.status == PayrollStatus::Draft {
            submit_payroll_run(db, &payroll_admin(), run_id).await?;
            approve_payroll_run(db, &account_admin(), run_id).await?;
        }
        Ok(process_payroll_run(db, settings, &super_admin(), run_id)
            .await?
            .value)
    }

    #[test]
    fn test_compute_payslip_field_officer() {
        let staff = staff::Model {
            id: 1,
            staff_number: "S-001".to_string(),
            full_name: "Ada Obi".to_string(),
            department: Some("Operations".to_string()),
            position: "Field Officer".to_string(),
            grade_level: 10,
            step: 5,
            status: staff::StaffStatus::Active,
            created_at: chrono::Utc::now(),
        };
        let draft = compute_payslip(
            &TaxTable::statutory(),
            &staff,
            140_000.0,
            &standard_allowance_rules(),
            &standard_deduction_rules(),
            &StaffAdjustments::default(),
        );

        assert_eq!(draft.allowances["housing"], 28_000.0);
        assert_eq!(draft.allowances["hazard"], 14_000.0);
        assert_eq!(draft.gross_pay, 182_000.0);
        assert_eq!(draft.deductions["pension"], 14_560.0);
        assert_eq!(draft.deductions["nhf"], 3_500.0);
        assert_eq!(draft.deductions["paye"], 21_830.0);
        assert_eq!(draft.total_deductions, 39_890.0);
        assert_eq!(draft.net_pay, 142_110.0);
    }

    #[tokio::test]
    async fn test_end_to_end_run_produces_expected_payslip() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        let staff = create_test_staff(&db, "S-001").await?;

        let outcome = process_new_run(&db, &Settings::default(), None).await?;
        assert_eq!(outcome.run.status, PayrollStatus::Processed);
        assert!(outcome.run.processed_at.is_some());
        assert_eq!(outcome.run.approved_by.as_deref(), Some("accounts"));
        assert!(outcome.skipped.is_empty());

        let payslips = get_payslips_for_run(&db, outcome.run.id).await?;
        assert_eq!(payslips.len(), 1);
        let payslip = &payslips[0];
        assert_eq!(payslip.staff_id, staff.id);
        assert_eq!(payslip.gross_pay, 182_000.0);
        assert_eq!(payslip.total_deductions, 39_890.0);
        assert_eq!(payslip.net_pay, 142_110.0);
        assert_eq!(payslip.deduction_breakdown()?["paye"], 21_830.0);
        assert_eq!(payslip.allowance_breakdown()?["hazard"], 14_000.0);

        assert_eq!(outcome.run.staff_count, 1);
        assert_eq!(outcome.run.gross_amount, 182_000.0);
        assert_eq!(outcome.run.total_deductions, 39_890.0);
        assert_eq!(outcome.run.net_amount, 142_110.0);

        for action in ["create", "submit", "approve", "process"] {
            assert_eq!(audit_count(&db, &format!("payroll_run.{action}")).await?, 1);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_run_aggregates_match_payslips() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        seed_salary(&db, 7, 2, 95_000.0).await?;
        create_test_staff(&db, "S-001").await?;
        create_custom_staff(&db, "S-002", Some("Finance"), "Accountant", 7, 2).await?;
        create_custom_staff(&db, "S-003", Some("Operations"), "Rural Nurse", 10, 5).await?;

        let outcome = process_new_run(&db, &Settings::default(), None).await?;
        let payslips = get_payslips_for_run(&db, outcome.run.id).await?;
        assert_eq!(payslips.len(), 3);

        let gross: f64 = payslips.iter().map(|p| p.gross_pay).sum();
        let deductions: f64 = payslips.iter().map(|p| p.total_deductions).sum();
        let net: f64 = payslips.iter().map(|p| p.net_pay).sum();
        assert!((outcome.run.gross_amount - gross).abs() < 0.005);
        assert!((outcome.run.total_deductions - deductions).abs() < 0.005);
        assert!((outcome.run.net_amount - net).abs() < 0.005);

        for payslip in &payslips {
            let allowances: f64 = payslip.allowance_breakdown()?.values().sum();
            let components = payslip.basic_salary
                + allowances
                + payslip.arrears
                + payslip.overtime
                + payslip.bonus;
            assert!((components - payslip.gross_pay).abs() < 0.005);
            assert!((payslip.gross_pay - payslip.total_deductions - payslip.net_pay).abs() < 0.005);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_department_scope_and_inactive_staff() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        create_test_staff(&db, "S-001").await?;
        create_custom_staff(&db, "S-002", Some("Finance"), "Accountant", 10, 5).await?;
        let retired = create_custom_staff(&db, "S-003", Some("Operations"), "Driver", 10, 5).await?;
        set_staff_status(&db, retired.id, staff::StaffStatus::Retired).await?;

        let outcome = process_new_run(&db, &Settings::default(), Some("Operations")).await?;
        assert_eq!(outcome.payslips.len(), 1);
        assert_eq!(outcome.run.department.as_deref(), Some("Operations"));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_salary_entry_is_skipped() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        create_test_staff(&db, "S-001").await?;
        let unscaled = create_custom_staff(&db, "S-002", None, "Clerk", 4, 3).await?;

        let outcome = process_new_run(&db, &Settings::default(), None).await?;
        assert_eq!(outcome.payslips.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].staff_id, unscaled.id);
        assert_eq!(outcome.run.staff_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_fallback_salary_when_enabled() -> Result<()> {
        let db = setup_test_db().await?;
        let run = create_payroll_run(&db, &payroll_admin(), june(), None).await?.value;
        create_custom_staff(&db, "S-001", None, "Clerk", 2, 1).await?;

        let mut settings = Settings::default();
        settings.payroll.allow_salary_fallback = true;
        let preview = rerun_payroll(&db, &settings, &payroll_admin(), run.id).await?;
        assert_eq!(preview.payslips.len(), 1);
        assert_eq!(preview.payslips[0].basic_salary, 45_000.0);
        assert_eq!(preview.payslips[0].salary_source, SalarySource::Fallback);
        Ok(())
    }

    #[tokio::test]
    async fn test_transitions_out_of_order_conflict() -> Result<()> {
        let db = setup_test_db().await?;
        let run = create_payroll_run(&db, &payroll_admin(), june(), None).await?.value;

        let approve = approve_payroll_run(&db, &account_admin(), run.id).await;
        assert!(matches!(approve, Err(Error::StateConflict { .. })));

        let process = process_payroll_run(&db, &Settings::default(), &super_admin(), run.id).await;
        assert!(matches!(process, Err(Error::StateConflict { .. })));

        // A failed transition leaves no audit trail
        assert_eq!(audit_count(&db, "payroll_run.approve").await?, 0);
        assert_eq!(get_payroll_run(&db, run.id).await?.status, PayrollStatus::Draft);
        Ok(())
    }

    #[tokio::test]
    async fn test_roles_gate_each_transition() -> Result<()> {
        let db = setup_test_db().await?;
        let hr = Actor::new("hr", crate::core::role::Role::HrAdmin);
        let create = create_payroll_run(&db, &hr, june(), None).await;
        assert!(matches!(create, Err(Error::Forbidden { .. })));

        let run = create_payroll_run(&db, &payroll_admin(), june(), None).await?.value;
        submit_payroll_run(&db, &payroll_admin(), run.id).await?;

        let self_approve = approve_payroll_run(&db, &payroll_admin(), run.id).await;
        assert!(matches!(self_approve, Err(Error::Forbidden { .. })));

        approve_payroll_run(&db, &account_admin(), run.id).await?;
        let accounts_process =
            process_payroll_run(&db, &Settings::default(), &account_admin(), run.id).await;
        assert!(matches!(accounts_process, Err(Error::Forbidden { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_reject_returns_run_to_draft() -> Result<()> {
        let db = setup_test_db().await?;
        let run = create_payroll_run(&db, &payroll_admin(), june(), None).await?.value;
        submit_payroll_run(&db, &payroll_admin(), run.id).await?;

        let rejected = reject_payroll_run(&db, &account_admin(), run.id).await?;
        assert_eq!(rejected.value.status, PayrollStatus::Draft);
        assert!(!rejected.notifications.is_empty());

        // It can go round again
        submit_payroll_run(&db, &payroll_admin(), run.id).await?;
        assert_eq!(audit_count(&db, "payroll_run.submit").await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_run_is_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        create_payroll_run(&db, &payroll_admin(), june(), None).await?;
        let duplicate = create_payroll_run(&db, &payroll_admin(), june(), None).await;
        assert!(matches!(duplicate, Err(Error::StateConflict { .. })));

        // The whole-organisation run already covers Finance
        let finance =
            create_payroll_run(&db, &payroll_admin(), june(), Some("Finance".to_string())).await;
        assert!(matches!(finance, Err(Error::StateConflict { .. })));

        // Another period is free
        create_payroll_run(&db, &payroll_admin(), june().next(), None).await?;
        assert_eq!(list_payroll_runs(&db, Some(june())).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_department_runs_cannot_overlap_a_global_run() -> Result<()> {
        let db = setup_test_db().await?;
        let finance = Some("Finance".to_string());
        let operations = Some("Operations".to_string());
        create_payroll_run(&db, &payroll_admin(), june(), finance.clone()).await?;
        create_payroll_run(&db, &payroll_admin(), june(), operations).await?;

        let again = create_payroll_run(&db, &payroll_admin(), june(), finance).await;
        assert!(matches!(again, Err(Error::StateConflict { .. })));
        let global = create_payroll_run(&db, &payroll_admin(), june(), None).await;
        assert!(matches!(global, Err(Error::StateConflict { .. })));

        assert_eq!(list_payroll_runs(&db, Some(june())).await?.len(), 2);
        assert_eq!(audit_count(&db, "payroll_run.create").await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_staff_paid_by_another_run_is_not_paid_again() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        let staff = create_test_staff(&db, "S-001").await?;
        let loan = create_loan(&db, &payroll_admin(), flat_loan(staff.id, 120_000.0, 12))
            .await?
            .value
            .loan;
        let operations = process_new_run(&db, &Settings::default(), Some("Operations")).await?;
        assert_eq!(operations.payslips.len(), 1);

        // The staff member transfers to Finance before Finance is paid
        let mut transfer: staff::ActiveModel = staff.clone().into();
        transfer.department = Set(Some("Finance".to_string()));
        transfer.update(&db).await?;

        let finance = process_new_run(&db, &Settings::default(), Some("Finance")).await?;
        assert!(finance.payslips.is_empty());
        assert_eq!(finance.skipped.len(), 1);
        assert_eq!(finance.skipped[0].staff_id, staff.id);
        assert_eq!(finance.run.staff_count, 0);

        let june_payslips = Payslip::find()
            .filter(payslip::Column::StaffId.eq(staff.id))
            .filter(payslip::Column::Period.eq(june().to_string()))
            .all(&db)
            .await?;
        assert_eq!(june_payslips.len(), 1);
        assert_eq!(get_loan(&db, loan.id).await?.installments_paid, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_payslips_hidden_until_processed() -> Result<()> {
        let db = setup_test_db().await?;
        let run = create_payroll_run(&db, &payroll_admin(), june(), None).await?.value;
        let result = get_payslips_for_run(&db, run.id).await;
        assert!(matches!(result, Err(Error::StateConflict { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_processed_run_is_locked() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        create_test_staff(&db, "S-001").await?;
        let outcome = process_new_run(&db, &Settings::default(), None).await?;

        let again =
            process_payroll_run(&db, &Settings::default(), &super_admin(), outcome.run.id).await;
        assert!(matches!(again, Err(Error::StateConflict { .. })));

        let approve = approve_payroll_run(&db, &account_admin(), outcome.run.id).await;
        assert!(matches!(approve, Err(Error::StateConflict { .. })));
        assert_eq!(audit_count(&db, "payroll_run.approve").await?, 1);

        let rerun =
            rerun_payroll(&db, &Settings::default(), &payroll_admin(), outcome.run.id).await;
        assert!(matches!(rerun, Err(Error::StateConflict { .. })));
        assert_eq!(get_payslips_for_run(&db, outcome.run.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_rerun_previews_without_writing() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        create_test_staff(&db, "S-001").await?;
        let run = create_payroll_run(&db, &payroll_admin(), june(), None).await?.value;

        let preview = rerun_payroll(&db, &Settings::default(), &payroll_admin(), run.id).await?;
        assert_eq!(preview.totals.staff_count, 1);
        assert_eq!(preview.totals.net_amount, 142_110.0);

        let stored = get_payroll_run(&db, run.id).await?;
        assert_eq!(stored.staff_count, 0);
        assert_eq!(stored.status, PayrollStatus::Draft);
        assert_eq!(Payslip::find().all(&db).await?.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_adjustments_flow_into_payslip() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        let staff = create_test_staff(&db, "S-001").await?;
        create_individual_allowance(
            &db,
            &payroll_admin(),
            NewIndividualAllowance {
                staff_id: staff.id,
                kind: AllowanceKind::Overtime,
                description: "June overtime".to_string(),
                amount: 8_000.0,
                period: june(),
            },
        )
        .await?;
        let loan = create_loan(&db, &payroll_admin(), flat_loan(staff.id, 120_000.0, 12))
            .await?
            .value
            .loan;

        let outcome = process_new_run(&db, &Settings::default(), None).await?;
        let payslip = &outcome.payslips[0];
        assert_eq!(payslip.overtime, 8_000.0);
        assert_eq!(payslip.gross_pay, 190_000.0);
        assert_eq!(payslip.deduction_breakdown()?["loan_repayment"], 11_000.0);

        let loan = get_loan(&db, loan.id).await?;
        assert_eq!(loan.installments_paid, 1);
        assert_eq!(loan.remaining_balance, 110_000.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_clears_payslips_and_reprocess_does_not_double_charge() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        let staff = create_test_staff(&db, "S-001").await?;
        create_individual_allowance(
            &db,
            &payroll_admin(),
            NewIndividualAllowance {
                staff_id: staff.id,
                kind: AllowanceKind::Bonus,
                description: "Mid-year bonus".to_string(),
                amount: 20_000.0,
                period: june(),
            },
        )
        .await?;
        let loan = create_loan(&db, &payroll_admin(), flat_loan(staff.id, 120_000.0, 12))
            .await?
            .value
            .loan;
        let first = process_new_run(&db, &Settings::default(), None).await?;
        let first_net = first.payslips[0].net_pay;

        let reopened = reopen_payroll_run(&db, &super_admin(), first.run.id).await?;
        assert_eq!(reopened.value.status, PayrollStatus::Draft);
        assert_eq!(reopened.value.staff_count, 0);
        assert_eq!(reopened.value.net_amount, 0.0);
        assert_eq!(reopened.value.approved_by, None);
        assert_eq!(reopened.notifications.len(), 3);
        assert_eq!(Payslip::find().all(&db).await?.len(), 0);

        let allowance = IndividualAllowance::find().one(&db).await?.unwrap();
        assert_eq!(allowance.status, AllowanceStatus::Pending);
        assert_eq!(allowance.applied_run_id, None);

        let audit = AuditLog::find()
            .filter(audit_log::Column::Action.eq("payroll_run.reopen"))
            .one(&db)
            .await?
            .unwrap();
        assert_eq!(audit.actor_id, "root");
        let old: serde_json::Value = serde_json::from_str(audit.old_values.as_deref().unwrap())?;
        assert_eq!(old["status"], "processed");

        // Take the same run round again
        submit_payroll_run(&db, &payroll_admin(), first.run.id).await?;
        approve_payroll_run(&db, &account_admin(), first.run.id).await?;
        let second = process_payroll_run(&db, &Settings::default(), &super_admin(), first.run.id)
            .await?
            .value;
        assert_eq!(second.payslips[0].net_pay, first_net);
        assert_eq!(second.payslips[0].bonus, 20_000.0);

        let loan = get_loan(&db, loan.id).await?;
        assert_eq!(loan.installments_paid, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reopening_an_earlier_period_does_not_recover_the_loan_again() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        let staff = create_test_staff(&db, "S-001").await?;
        let loan = create_loan(&db, &payroll_admin(), flat_loan(staff.id, 120_000.0, 12))
            .await?
            .value
            .loan;

        let first_june = process_new_run(&db, &Settings::default(), None).await?;
        process_run_for(&db, &Settings::default(), june().next(), None).await?;
        assert_eq!(get_loan(&db, loan.id).await?.installments_paid, 2);

        reopen_payroll_run(&db, &super_admin(), first_june.run.id).await?;
        let second_june = reprocess(&db, &Settings::default(), first_june.run.id).await?;
        assert_eq!(
            second_june.payslips[0].deduction_breakdown()?["loan_repayment"],
            11_000.0
        );
        assert_eq!(second_june.payslips[0].net_pay, first_june.payslips[0].net_pay);

        let loan = get_loan(&db, loan.id).await?;
        assert_eq!(loan.installments_paid, 2);
        assert_eq!(loan.remaining_balance, 100_000.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_only_super_admin_reopens() -> Result<()> {
        let db = setup_test_db().await?;
        seed_standard_pay(&db).await?;
        create_test_staff(&db, "S-001").await?;
        let outcome = process_new_run(&db, &Settings::default(), None).await?;

        for actor in [payroll_admin(), account_admin()] {
            let result = reopen_payroll_run(&db, &actor, outcome.run.id).await;
            assert!(matches!(result, Err(Error::Forbidden { .. })));
        }
        assert_eq!(audit_count(&db, "payroll_run.reopen").await?, 0);
        Ok(())
    }
}
