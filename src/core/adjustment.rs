//! Individual adjustment ledger - per-staff ad-hoc allowances and deductions.
//!
//! Allowances are paid once, in the period they are recorded for: `pending` entries are
//! pulled into that period's payroll and marked `applied` when the run is processed.
//! Deductions recur every period in their range until cancelled or recovered. Each
//! recovery is recorded in the `deduction_applications` ledger, keyed on deduction and
//! period, so a reopened and reprocessed run never recovers the same month twice, even
//! after later periods have been processed.

use super::effects::{
    AuditRecord, Notification, NotificationKind, Outcome, Recipient, record_audit,
};
use super::loan::{apply_loan_installment, get_loan, next_installment};
use super::period::Period;
use super::role::{Actor, Capability};
use super::round_money;
use crate::{
    entities::{
        Cooperative, DeductionApplication, IndividualAllowance, IndividualDeduction,
        deduction_application, individual_allowance,
        individual_allowance::{AllowanceKind, AllowanceStatus},
        individual_deduction,
        individual_deduction::{DeductionKind, DeductionStatus},
        loan::LoanStatus,
    },
    errors::{Error, Result},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Input for [`create_individual_allowance`]
#[derive(Debug, Clone)]
pub struct NewIndividualAllowance {
    /// Staff member to pay
    pub staff_id: i64,
    /// Arrears, overtime, bonus or other
    pub kind: AllowanceKind,
    /// Payslip label; required for `Other`
    pub description: String,
    /// Amount to pay
    pub amount: f64,
    /// Period whose payroll pays it
    pub period: Period,
}

/// Input for [`create_individual_deduction`]
#[derive(Debug, Clone)]
pub struct NewIndividualDeduction {
    /// Staff member to charge
    pub staff_id: i64,
    /// `Cooperative` or `Other`; loan deductions are created with the loan
    pub kind: DeductionKind,
    /// Payslip label for `Other` deductions
    pub description: String,
    /// Amount per period
    pub amount: f64,
    /// Total to recover, if the deduction stops once it is reached
    pub total_amount: Option<f64>,
    /// First period charged
    pub start_period: Period,
    /// Last period charged, if bounded
    pub end_period: Option<Period>,
    /// Cooperative receiving a `Cooperative` deduction
    pub cooperative_id: Option<i64>,
}

/// One deduction's contribution to a period
#[derive(Debug, Clone, PartialEq)]
struct DeductionCharge {
    deduction_id: i64,
    amount: f64,
    already_applied: bool,
}

/// Everything the adjustment ledger contributes to one staff member's payslip
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaffAdjustments {
    /// Back pay
    pub arrears: f64,
    /// Overtime pay
    pub overtime: f64,
    /// Bonus pay
    pub bonus: f64,
    /// Other allowances by description
    pub other_allowances: BTreeMap<String, f64>,
    /// Loan repayments due
    pub loans: f64,
    /// Cooperative contributions due
    pub cooperatives: f64,
    /// Other deductions by description
    pub other_deductions: BTreeMap<String, f64>,
    allowance_ids: Vec<i64>,
    charges: Vec<DeductionCharge>,
}

impl StaffAdjustments {
    /// Whether the ledger contributes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowance_ids.is_empty() && self.charges.is_empty()
    }
}

fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::validation(format!(
            "Adjustment amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

/// Records a one-off allowance for a staff member.
pub async fn create_individual_allowance(
    db: &DatabaseConnection,
    actor: &Actor,
    new_allowance: NewIndividualAllowance,
) -> Result<Outcome<individual_allowance::Model>> {
    actor.require(Capability::ManageAdjustments)?;
    validate_amount(new_allowance.amount)?;
    if new_allowance.kind == AllowanceKind::Other && new_allowance.description.trim().is_empty() {
        return Err(Error::validation(
            "Other allowances need a description to appear on the payslip",
        ));
    }

    let txn = db.begin().await?;
    super::staff::get_staff(&txn, new_allowance.staff_id).await?;

    let allowance = individual_allowance::ActiveModel {
        staff_id: Set(new_allowance.staff_id),
        kind: Set(new_allowance.kind),
        description: Set(new_allowance.description.trim().to_string()),
        amount: Set(round_money(new_allowance.amount)),
        period: Set(new_allowance.period.to_string()),
        status: Set(AllowanceStatus::Pending),
        applied_run_id: Set(None),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    record_audit(
        &txn,
        &AuditRecord::new(
            &actor.user_id,
            "individual_allowance.create",
            "individual_allowances",
            allowance.id,
        )
        .with_new(json!({
            "staff_id": allowance.staff_id,
            "kind": allowance.kind,
            "amount": allowance.amount,
            "period": allowance.period,
        })),
    )
    .await?;
    txn.commit().await?;

    let notification = Notification::new(
        Recipient::Staff(allowance.staff_id),
        "Allowance added",
        format!(
            "An allowance of {:.2} will be paid with the {} payroll.",
            allowance.amount, allowance.period
        ),
        NotificationKind::Info,
    );
    Ok(Outcome::new(allowance, vec![notification]))
}

/// Cancels a pending allowance. Applied allowances are part of a payslip and cannot be
/// cancelled.
pub async fn cancel_individual_allowance(
    db: &DatabaseConnection,
    actor: &Actor,
    allowance_id: i64,
) -> Result<individual_allowance::Model> {
    actor.require(Capability::ManageAdjustments)?;

    let txn = db.begin().await?;
    let result = IndividualAllowance::update_many()
        .set(individual_allowance::ActiveModel {
            status: Set(AllowanceStatus::Cancelled),
            ..Default::default()
        })
        .filter(individual_allowance::Column::Id.eq(allowance_id))
        .filter(individual_allowance::Column::Status.eq(AllowanceStatus::Pending))
        .exec(&txn)
        .await?;

    let allowance = IndividualAllowance::find_by_id(allowance_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Individual allowance", allowance_id))?;
    if result.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "Only pending allowances can be cancelled; allowance {allowance_id} is {:?}",
            allowance.status
        )));
    }

    record_audit(
        &txn,
        &AuditRecord::new(
            &actor.user_id,
            "individual_allowance.cancel",
            "individual_allowances",
            allowance_id,
        )
        .with_old(json!({"status": AllowanceStatus::Pending}))
        .with_new(json!({"status": AllowanceStatus::Cancelled})),
    )
    .await?;
    txn.commit().await?;
    Ok(allowance)
}

/// Records a recurring (or bounded) deduction for a staff member.
pub async fn create_individual_deduction(
    db: &DatabaseConnection,
    actor: &Actor,
    new_deduction: NewIndividualDeduction,
) -> Result<Outcome<individual_deduction::Model>> {
    actor.require(Capability::ManageAdjustments)?;
    validate_amount(new_deduction.amount)?;
    if new_deduction.kind == DeductionKind::Loan {
        return Err(Error::validation(
            "Loan repayments are created together with the loan",
        ));
    }
    if let Some(total) = new_deduction.total_amount {
        validate_amount(total)?;
    }
    if new_deduction
        .end_period
        .is_some_and(|end| end < new_deduction.start_period)
    {
        return Err(Error::validation("Deduction end period precedes its start"));
    }

    let txn = db.begin().await?;
    super::staff::get_staff(&txn, new_deduction.staff_id).await?;

    match (new_deduction.kind, new_deduction.cooperative_id) {
        (DeductionKind::Cooperative, Some(cooperative_id)) => {
            let cooperative = Cooperative::find_by_id(cooperative_id)
                .one(&txn)
                .await?
                .ok_or_else(|| Error::not_found("Cooperative", cooperative_id))?;
            if !cooperative.is_active {
                return Err(Error::validation(format!(
                    "Cooperative '{}' is not active",
                    cooperative.name
                )));
            }
        }
        (DeductionKind::Cooperative, None) => {
            return Err(Error::validation(
                "Cooperative deductions must name a cooperative",
            ));
        }
        _ => {}
    }

    let total_amount = new_deduction.total_amount.map(round_money);
    let deduction = individual_deduction::ActiveModel {
        staff_id: Set(new_deduction.staff_id),
        kind: Set(new_deduction.kind),
        description: Set(new_deduction.description.trim().to_string()),
        amount: Set(round_money(new_deduction.amount)),
        total_amount: Set(total_amount),
        remaining_balance: Set(total_amount),
        start_period: Set(new_deduction.start_period.to_string()),
        end_period: Set(new_deduction.end_period.map(|p| p.to_string())),
        loan_id: Set(None),
        is_loan_repayment: Set(false),
        cooperative_id: Set(new_deduction.cooperative_id),
        status: Set(DeductionStatus::Active),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    record_audit(
        &txn,
        &AuditRecord::new(
            &actor.user_id,
            "individual_deduction.create",
            "individual_deductions",
            deduction.id,
        )
        .with_new(json!({
            "staff_id": deduction.staff_id,
            "kind": deduction.kind,
            "amount": deduction.amount,
            "total_amount": deduction.total_amount,
            "start_period": deduction.start_period,
            "end_period": deduction.end_period,
        })),
    )
    .await?;
    txn.commit().await?;

    let notification = Notification::new(
        Recipient::Staff(deduction.staff_id),
        "Deduction added",
        format!(
            "A deduction of {:.2} per month starts in {}.",
            deduction.amount, deduction.start_period
        ),
        NotificationKind::Info,
    );
    Ok(Outcome::new(deduction, vec![notification]))
}

/// Stops an active deduction.
pub async fn cancel_individual_deduction(
    db: &DatabaseConnection,
    actor: &Actor,
    deduction_id: i64,
) -> Result<individual_deduction::Model> {
    actor.require(Capability::ManageAdjustments)?;

    let txn = db.begin().await?;
    let current = IndividualDeduction::find_by_id(deduction_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Individual deduction", deduction_id))?;
    if current.is_loan_repayment {
        return Err(Error::validation(
            "Loan repayments stop when the loan is cancelled",
        ));
    }

    let result = IndividualDeduction::update_many()
        .set(individual_deduction::ActiveModel {
            status: Set(DeductionStatus::Cancelled),
            ..Default::default()
        })
        .filter(individual_deduction::Column::Id.eq(deduction_id))
        .filter(individual_deduction::Column::Status.eq(DeductionStatus::Active))
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "Only active deductions can be cancelled; deduction {deduction_id} is {:?}",
            current.status
        )));
    }

    record_audit(
        &txn,
        &AuditRecord::new(
            &actor.user_id,
            "individual_deduction.cancel",
            "individual_deductions",
            deduction_id,
        )
        .with_old(json!({"status": current.status}))
        .with_new(json!({"status": DeductionStatus::Cancelled})),
    )
    .await?;

    let deduction = IndividualDeduction::find_by_id(deduction_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Individual deduction", deduction_id))?;
    txn.commit().await?;
    Ok(deduction)
}

/// Pending allowances of a staff member for a period.
pub async fn get_pending_allowances<C>(
    db: &C,
    staff_id: i64,
    period: Period,
) -> Result<Vec<individual_allowance::Model>>
where
    C: ConnectionTrait,
{
    IndividualAllowance::find()
        .filter(individual_allowance::Column::StaffId.eq(staff_id))
        .filter(individual_allowance::Column::Period.eq(period.to_string()))
        .filter(individual_allowance::Column::Status.eq(AllowanceStatus::Pending))
        .order_by_asc(individual_allowance::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Amounts already recovered from a staff member in a period, by deduction id.
async fn applications_for_period<C>(
    db: &C,
    staff_id: i64,
    period: Period,
) -> Result<BTreeMap<i64, f64>>
where
    C: ConnectionTrait,
{
    let applications = DeductionApplication::find()
        .filter(deduction_application::Column::StaffId.eq(staff_id))
        .filter(deduction_application::Column::Period.eq(period.to_string()))
        .all(db)
        .await?;
    Ok(applications
        .into_iter()
        .map(|application| (application.deduction_id, application.amount))
        .collect())
}

/// Deductions of a staff member that cover a period: active ones in range, plus any
/// already applied in this very period.
pub async fn get_deductions_for_period<C>(
    db: &C,
    staff_id: i64,
    period: Period,
) -> Result<Vec<individual_deduction::Model>>
where
    C: ConnectionTrait,
{
    let applied: Vec<i64> = applications_for_period(db, staff_id, period)
        .await?
        .into_keys()
        .collect();
    let period = period.to_string();
    IndividualDeduction::find()
        .filter(individual_deduction::Column::StaffId.eq(staff_id))
        .filter(individual_deduction::Column::StartPeriod.lte(period.clone()))
        .filter(
            Condition::any()
                .add(individual_deduction::Column::EndPeriod.is_null())
                .add(individual_deduction::Column::EndPeriod.gte(period)),
        )
        .filter(
            Condition::any()
                .add(individual_deduction::Column::Status.eq(DeductionStatus::Active))
                .add(individual_deduction::Column::Id.is_in(applied)),
        )
        .order_by_asc(individual_deduction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

async fn amount_due<C>(db: &C, deduction: &individual_deduction::Model) -> Result<f64>
where
    C: ConnectionTrait,
{
    if deduction.is_loan_repayment {
        let Some(loan_id) = deduction.loan_id else {
            return Err(Error::validation(format!(
                "Loan repayment deduction {} has no loan",
                deduction.id
            )));
        };
        let loan = get_loan(db, loan_id).await?;
        return Ok(next_installment(&loan)?.map_or(0.0, |installment| installment.total));
    }
    Ok(deduction
        .remaining_balance
        .map_or(deduction.amount, |remaining| deduction.amount.min(remaining)))
}

/// Gathers a staff member's ad-hoc allowances and deductions for a period.
pub async fn collect_staff_adjustments<C>(
    db: &C,
    staff_id: i64,
    period: Period,
) -> Result<StaffAdjustments>
where
    C: ConnectionTrait,
{
    let mut adjustments = StaffAdjustments::default();

    for allowance in get_pending_allowances(db, staff_id, period).await? {
        match allowance.kind {
            AllowanceKind::Arrears => adjustments.arrears += allowance.amount,
            AllowanceKind::Overtime => adjustments.overtime += allowance.amount,
            AllowanceKind::Bonus => adjustments.bonus += allowance.amount,
            AllowanceKind::Other => {
                *adjustments
                    .other_allowances
                    .entry(allowance.description.clone())
                    .or_default() += allowance.amount;
            }
        }
        adjustments.allowance_ids.push(allowance.id);
    }

    let applied = applications_for_period(db, staff_id, period).await?;
    for deduction in get_deductions_for_period(db, staff_id, period).await? {
        let previous = applied.get(&deduction.id).copied();
        let already_applied = previous.is_some();
        let amount = match previous {
            Some(amount) => amount,
            None => amount_due(db, &deduction).await?,
        };
        if amount <= 0.0 {
            continue;
        }

        match deduction.kind {
            DeductionKind::Loan => adjustments.loans += amount,
            DeductionKind::Cooperative => adjustments.cooperatives += amount,
            DeductionKind::Other => {
                *adjustments
                    .other_deductions
                    .entry(deduction.description.clone())
                    .or_default() += amount;
            }
        }
        adjustments.charges.push(DeductionCharge {
            deduction_id: deduction.id,
            amount,
            already_applied,
        });
    }

    adjustments.arrears = round_money(adjustments.arrears);
    adjustments.overtime = round_money(adjustments.overtime);
    adjustments.bonus = round_money(adjustments.bonus);
    adjustments.loans = round_money(adjustments.loans);
    adjustments.cooperatives = round_money(adjustments.cooperatives);
    Ok(adjustments)
}

/// Marks collected allowances as paid by `run_id` and applies each deduction not yet
/// applied in `period`, including the linked loan installment for loan repayments.
/// Call inside the transaction that writes the payslips.
pub async fn apply_staff_adjustments<C>(
    db: &C,
    adjustments: &StaffAdjustments,
    run_id: i64,
    period: Period,
) -> Result<()>
where
    C: ConnectionTrait,
{
    if !adjustments.allowance_ids.is_empty() {
        IndividualAllowance::update_many()
            .set(individual_allowance::ActiveModel {
                status: Set(AllowanceStatus::Applied),
                applied_run_id: Set(Some(run_id)),
                ..Default::default()
            })
            .filter(individual_allowance::Column::Id.is_in(adjustments.allowance_ids.clone()))
            .filter(individual_allowance::Column::Status.eq(AllowanceStatus::Pending))
            .exec(db)
            .await?;
    }

    for charge in adjustments.charges.iter().filter(|c| !c.already_applied) {
        let deduction = IndividualDeduction::find_by_id(charge.deduction_id)
            .one(db)
            .await?
            .ok_or_else(|| Error::not_found("Individual deduction", charge.deduction_id))?;

        deduction_application::ActiveModel {
            deduction_id: Set(deduction.id),
            staff_id: Set(deduction.staff_id),
            period: Set(period.to_string()),
            amount: Set(charge.amount),
            payroll_run_id: Set(run_id),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await?;

        let mut update = <individual_deduction::ActiveModel as Default>::default();
        if let (true, Some(loan_id)) = (deduction.is_loan_repayment, deduction.loan_id) {
            let applied = apply_loan_installment(db, loan_id).await?;
            if applied.loan.status == LoanStatus::PaidOff {
                update.status = Set(DeductionStatus::PaidOff);
            }
        } else if let Some(remaining) = deduction.remaining_balance {
            let remaining = round_money((remaining - charge.amount).max(0.0));
            update.remaining_balance = Set(Some(remaining));
            if remaining <= 0.0 {
                update.status = Set(DeductionStatus::PaidOff);
            }
        }

        if update.is_changed() {
            IndividualDeduction::update_many()
                .set(update)
                .filter(individual_deduction::Column::Id.eq(deduction.id))
                .exec(db)
                .await?;
        }
        debug!(
            deduction_id = deduction.id,
            amount = charge.amount,
            %period,
            "Applied individual deduction"
        );
    }
    Ok(())
}

/// Returns the allowances paid by a run to `pending`, for when the run is reopened.
pub async fn release_run_allowances<C>(db: &C, run_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = IndividualAllowance::update_many()
        .set(individual_allowance::ActiveModel {
            status: Set(AllowanceStatus::Pending),
            applied_run_id: Set(None),
            ..Default::default()
        })
        .filter(individual_allowance::Column::AppliedRunId.eq(run_id))
        .filter(individual_allowance::Column::Status.eq(AllowanceStatus::Applied))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}
