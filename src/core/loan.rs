//! Loan amortization - repayment schedules and installment application.
//!
//! Interest rates are annual percentages. All amounts are rounded to kobo and the
//! final installment absorbs whatever rounding left over, so a fully repaid loan
//! always ends at exactly zero.

use super::effects::{
    AuditRecord, Notification, NotificationKind, Outcome, Recipient, record_audit,
};
use super::period::Period;
use super::role::{Actor, Capability};
use super::round_money;
use crate::{
    entities::{
        IndividualDeduction, Loan, individual_deduction, loan,
        loan::{InterestMethod, LoanStatus},
    },
    errors::{Error, Result},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

/// Longest repayment term accepted, in months
pub const MAX_INSTALLMENTS: i32 = 360;

/// One month of a repayment schedule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Installment {
    /// 1-based installment number
    pub number: i32,
    /// Principal recovered by this installment
    pub principal: f64,
    /// Interest charged by this installment
    pub interest: f64,
    /// Amount deducted from pay
    pub total: f64,
    /// Outstanding principal after this installment
    pub balance_after: f64,
}

/// A complete repayment schedule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanSchedule {
    /// Interest method used
    pub method: InterestMethod,
    /// Principal of a regular installment
    pub monthly_principal: f64,
    /// Interest of a regular installment (the first one for reducing balance)
    pub monthly_interest: f64,
    /// Regular installment amount
    pub monthly_total: f64,
    /// Interest over the term
    pub total_interest: f64,
    /// Principal plus interest
    pub total_repayable: f64,
    /// Month-by-month breakdown
    pub installments: Vec<Installment>,
}

/// Builds the repayment schedule for a loan.
///
/// Flat: principal / n each month, with simple interest `principal x rate x n/12`
/// spread evenly. Reducing: a level annuity payment, with each month's interest
/// charged on the balance outstanding at the start of that month.
///
/// # Errors
/// [`Error::Validation`] for a non-positive principal, a negative rate, or a term
/// outside 1..=[`MAX_INSTALLMENTS`].
pub fn calculate_loan_schedule(
    principal: f64,
    annual_rate: f64,
    installments: i32,
    method: InterestMethod,
) -> Result<LoanSchedule> {
    if !principal.is_finite() || principal <= 0.0 {
        return Err(Error::validation("Loan principal must be positive"));
    }
    if !annual_rate.is_finite() || annual_rate < 0.0 {
        return Err(Error::validation("Interest rate cannot be negative"));
    }
    if !(1..=MAX_INSTALLMENTS).contains(&installments) {
        return Err(Error::validation(format!(
            "Number of installments must be between 1 and {MAX_INSTALLMENTS}"
        )));
    }

    let principal = round_money(principal);
    Ok(match method {
        InterestMethod::Flat => flat_schedule(principal, annual_rate, installments),
        InterestMethod::Reducing => reducing_schedule(principal, annual_rate, installments),
    })
}

fn flat_schedule(principal: f64, annual_rate: f64, n: i32) -> LoanSchedule {
    let months = f64::from(n);
    let monthly_principal = round_money(principal / months);
    let total_interest = round_money(principal * (annual_rate / 100.0) * (months / 12.0));
    let monthly_interest = round_money(total_interest / months);

    let mut balance = principal;
    let mut interest_charged = 0.0;
    let mut rows = Vec::with_capacity(n as usize);
    for number in 1..=n {
        let last = number == n;
        let principal_part = if last { balance } else { monthly_principal };
        let interest_part = if last {
            round_money(total_interest - interest_charged)
        } else {
            monthly_interest
        };
        balance = if last {
            0.0
        } else {
            round_money(balance - principal_part)
        };
        interest_charged = round_money(interest_charged + interest_part);
        rows.push(Installment {
            number,
            principal: principal_part,
            interest: interest_part,
            total: round_money(principal_part + interest_part),
            balance_after: balance,
        });
    }

    LoanSchedule {
        method: InterestMethod::Flat,
        monthly_principal,
        monthly_interest,
        monthly_total: round_money(monthly_principal + monthly_interest),
        total_interest,
        total_repayable: round_money(principal + total_interest),
        installments: rows,
    }
}

fn reducing_schedule(principal: f64, annual_rate: f64, n: i32) -> LoanSchedule {
    let monthly_rate = annual_rate / 100.0 / 12.0;
    let payment = if monthly_rate == 0.0 {
        round_money(principal / f64::from(n))
    } else {
        round_money(principal * monthly_rate / (1.0 - (1.0 + monthly_rate).powi(-n)))
    };

    let mut balance = principal;
    let mut total_interest = 0.0;
    let mut rows = Vec::with_capacity(n as usize);
    for number in 1..=n {
        let interest_part = round_money(balance * monthly_rate);
        let principal_part = if number == n {
            balance
        } else {
            round_money(payment - interest_part).clamp(0.0, balance)
        };
        balance = if number == n {
            0.0
        } else {
            round_money(balance - principal_part)
        };
        total_interest = round_money(total_interest + interest_part);
        rows.push(Installment {
            number,
            principal: principal_part,
            interest: interest_part,
            total: round_money(principal_part + interest_part),
            balance_after: balance,
        });
    }

    let (monthly_principal, monthly_interest) = rows
        .first()
        .map_or((0.0, 0.0), |first| (first.principal, first.interest));

    LoanSchedule {
        method: InterestMethod::Reducing,
        monthly_principal,
        monthly_interest,
        monthly_total: payment,
        total_interest,
        total_repayable: round_money(principal + total_interest),
        installments: rows,
    }
}

/// Rebuilds the schedule a stored loan was created with.
pub fn schedule_for(loan: &loan::Model) -> Result<LoanSchedule> {
    calculate_loan_schedule(
        loan.principal,
        loan.interest_rate,
        loan.number_of_installments,
        loan.method,
    )
}

/// The installment the loan will apply next, or `None` once it is no longer active.
pub fn next_installment(loan: &loan::Model) -> Result<Option<Installment>> {
    if loan.status != LoanStatus::Active {
        return Ok(None);
    }
    let schedule = schedule_for(loan)?;
    Ok(usize::try_from(loan.installments_paid)
        .ok()
        .and_then(|paid| schedule.installments.get(paid).cloned()))
}

/// Input for [`create_loan`]
#[derive(Debug, Clone)]
pub struct NewLoan {
    /// Borrowing staff member
    pub staff_id: i64,
    /// Amount lent
    pub principal: f64,
    /// Annual interest rate in percent
    pub interest_rate: f64,
    /// Number of monthly installments
    pub number_of_installments: i32,
    /// Interest method
    pub method: InterestMethod,
    /// First period repayments are deducted in
    pub start_period: Period,
}

/// A newly created loan and its payroll deduction
#[derive(Debug, Clone)]
pub struct CreatedLoan {
    /// The loan
    pub loan: loan::Model,
    /// Loan-repayment deduction pulled into each payroll run
    pub deduction: individual_deduction::Model,
}

/// Result of applying one installment
#[derive(Debug, Clone)]
pub struct AppliedInstallment {
    /// Loan after the installment
    pub loan: loan::Model,
    /// The installment that was applied
    pub installment: Installment,
}

/// A schedule row annotated with whether it has been paid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledInstallment {
    /// The schedule row
    #[serde(flatten)]
    pub installment: Installment,
    /// Whether the installment has been applied
    pub paid: bool,
}

/// Records a loan and the loan-repayment deduction that recovers it through payroll.
#[instrument(skip(db, actor), fields(actor = %actor.user_id))]
pub async fn create_loan(
    db: &DatabaseConnection,
    actor: &Actor,
    new_loan: NewLoan,
) -> Result<Outcome<CreatedLoan>> {
    actor.require(Capability::ManageLoans)?;
    let schedule = calculate_loan_schedule(
        new_loan.principal,
        new_loan.interest_rate,
        new_loan.number_of_installments,
        new_loan.method,
    )?;

    let txn = db.begin().await?;
    super::staff::get_staff(&txn, new_loan.staff_id).await?;

    let now = chrono::Utc::now();
    let principal = round_money(new_loan.principal);
    let loan = loan::ActiveModel {
        staff_id: Set(new_loan.staff_id),
        principal: Set(principal),
        interest_rate: Set(new_loan.interest_rate),
        method: Set(new_loan.method),
        number_of_installments: Set(new_loan.number_of_installments),
        installments_paid: Set(0),
        monthly_principal: Set(schedule.monthly_principal),
        monthly_interest: Set(schedule.monthly_interest),
        monthly_total: Set(schedule.monthly_total),
        total_interest: Set(schedule.total_interest),
        remaining_balance: Set(principal),
        status: Set(LoanStatus::Active),
        start_period: Set(new_loan.start_period.to_string()),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let deduction = individual_deduction::ActiveModel {
        staff_id: Set(loan.staff_id),
        kind: Set(individual_deduction::DeductionKind::Loan),
        description: Set(format!("Loan #{} repayment", loan.id)),
        amount: Set(schedule.monthly_total),
        total_amount: Set(None),
        remaining_balance: Set(None),
        start_period: Set(loan.start_period.clone()),
        end_period: Set(None),
        loan_id: Set(Some(loan.id)),
        is_loan_repayment: Set(true),
        cooperative_id: Set(None),
        status: Set(individual_deduction::DeductionStatus::Active),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    record_audit(
        &txn,
        &AuditRecord::new(&actor.user_id, "loan.create", "loans", loan.id).with_new(json!({
            "staff_id": loan.staff_id,
            "principal": loan.principal,
            "interest_rate": loan.interest_rate,
            "method": loan.method,
            "number_of_installments": loan.number_of_installments,
            "monthly_total": loan.monthly_total,
        })),
    )
    .await?;
    txn.commit().await?;

    info!(loan_id = loan.id, staff_id = loan.staff_id, "Loan created");
    let notification = Notification::new(
        Recipient::Staff(loan.staff_id),
        "Loan recorded",
        format!(
            "A loan of {:.2} has been recorded. {} installments of {:.2} start in {}.",
            loan.principal, loan.number_of_installments, loan.monthly_total, loan.start_period
        ),
        NotificationKind::Info,
    );
    Ok(Outcome::new(CreatedLoan { loan, deduction }, vec![notification]))
}

/// Finds a loan by id.
pub async fn get_loan<C>(db: &C, loan_id: i64) -> Result<loan::Model>
where
    C: ConnectionTrait,
{
    Loan::find_by_id(loan_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Loan", loan_id))
}

/// Applies the next installment of an active loan.
///
/// The remaining balance drops by the installment's principal component and the loan
/// becomes `paid_off` with the final installment. The update is conditional on
/// `installments_paid` still holding the value that was read, so two concurrent
/// applications cannot both succeed.
pub async fn apply_loan_installment<C>(db: &C, loan_id: i64) -> Result<AppliedInstallment>
where
    C: ConnectionTrait,
{
    let current = get_loan(db, loan_id).await?;
    if current.status != LoanStatus::Active {
        return Err(Error::conflict(format!(
            "Loan {loan_id} is not active and cannot take installments"
        )));
    }
    let installment = next_installment(&current)?.ok_or_else(|| {
        Error::conflict(format!("Loan {loan_id} has no installments left to apply"))
    })?;

    let paid = installment.number;
    let status = if paid >= current.number_of_installments || installment.balance_after <= 0.0 {
        LoanStatus::PaidOff
    } else {
        LoanStatus::Active
    };

    let result = Loan::update_many()
        .set(loan::ActiveModel {
            installments_paid: Set(paid),
            remaining_balance: Set(installment.balance_after),
            status: Set(status),
            ..Default::default()
        })
        .filter(loan::Column::Id.eq(loan_id))
        .filter(loan::Column::InstallmentsPaid.eq(current.installments_paid))
        .filter(loan::Column::Status.eq(LoanStatus::Active))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "Loan {loan_id} was modified concurrently"
        )));
    }

    let loan = get_loan(db, loan_id).await?;
    Ok(AppliedInstallment { loan, installment })
}

/// The loan's full schedule with paid installments marked.
pub async fn get_loan_repayment_schedule<C>(
    db: &C,
    loan_id: i64,
) -> Result<(loan::Model, Vec<ScheduledInstallment>)>
where
    C: ConnectionTrait,
{
    let loan = get_loan(db, loan_id).await?;
    let schedule = schedule_for(&loan)?;
    let rows = schedule
        .installments
        .into_iter()
        .map(|installment| ScheduledInstallment {
            paid: installment.number <= loan.installments_paid,
            installment,
        })
        .collect();
    Ok((loan, rows))
}

/// Cancels an active loan together with its repayment deductions.
#[instrument(skip(db, actor), fields(actor = %actor.user_id))]
pub async fn cancel_loan(
    db: &DatabaseConnection,
    actor: &Actor,
    loan_id: i64,
) -> Result<Outcome<loan::Model>> {
    actor.require(Capability::ManageLoans)?;

    let txn = db.begin().await?;
    let current = get_loan(&txn, loan_id).await?;
    if current.status != LoanStatus::Active {
        return Err(Error::conflict(format!(
            "Only active loans can be cancelled; loan {loan_id} is {:?}",
            current.status
        )));
    }

    let result = Loan::update_many()
        .set(loan::ActiveModel {
            status: Set(LoanStatus::Cancelled),
            ..Default::default()
        })
        .filter(loan::Column::Id.eq(loan_id))
        .filter(loan::Column::Status.eq(LoanStatus::Active))
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "Loan {loan_id} was modified concurrently"
        )));
    }

    IndividualDeduction::update_many()
        .set(individual_deduction::ActiveModel {
            status: Set(individual_deduction::DeductionStatus::Cancelled),
            ..Default::default()
        })
        .filter(individual_deduction::Column::LoanId.eq(loan_id))
        .filter(
            individual_deduction::Column::Status.eq(individual_deduction::DeductionStatus::Active),
        )
        .exec(&txn)
        .await?;

    record_audit(
        &txn,
        &AuditRecord::new(&actor.user_id, "loan.cancel", "loans", loan_id)
            .with_old(json!({
                "status": current.status,
                "remaining_balance": current.remaining_balance,
            }))
            .with_new(json!({"status": LoanStatus::Cancelled})),
    )
    .await?;

    let loan = get_loan(&txn, loan_id).await?;
    txn.commit().await?;

    let notification = Notification::new(
        Recipient::Staff(loan.staff_id),
        "Loan cancelled",
        format!("Loan #{loan_id} has been cancelled; no further repayments will be deducted."),
        NotificationKind::Info,
    );
    Ok(Outcome::new(loan, vec![notification]))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::role::Role;
    use crate::test_utils::*;

    fn admin() -> Actor {
        Actor::new("loans-admin", Role::PayrollAdmin)
    }

    #[test]
    fn test_flat_schedule_amounts() {
        let schedule = calculate_loan_schedule(120_000.0, 10.0, 12, InterestMethod::Flat).unwrap();
        assert_eq!(schedule.monthly_principal, 10_000.0);
        assert_eq!(schedule.total_interest, 12_000.0);
        assert_eq!(schedule.monthly_interest, 1_000.0);
        assert_eq!(schedule.monthly_total, 11_000.0);
        assert_eq!(schedule.total_repayable, 132_000.0);
        assert_eq!(schedule.installments.len(), 12);
        assert_eq!(schedule.installments.last().unwrap().balance_after, 0.0);
    }

    #[test]
    fn test_flat_schedule_final_installment_absorbs_rounding() {
        let schedule = calculate_loan_schedule(100_000.0, 0.0, 3, InterestMethod::Flat).unwrap();
        assert_eq!(schedule.monthly_principal, 33_333.33);
        assert_eq!(schedule.installments[0].balance_after, 66_666.67);
        assert_eq!(schedule.installments[1].balance_after, 33_333.34);
        assert_eq!(schedule.installments[2].principal, 33_333.34);
        assert_eq!(schedule.installments[2].balance_after, 0.0);

        let recovered: f64 = schedule.installments.iter().map(|i| i.principal).sum();
        assert!((recovered - 100_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_reducing_schedule_ends_at_zero() {
        let schedule =
            calculate_loan_schedule(500_000.0, 12.0, 24, InterestMethod::Reducing).unwrap();
        assert_eq!(schedule.installments.len(), 24);
        assert_eq!(schedule.installments.last().unwrap().balance_after, 0.0);

        // 1% a month on 500,000
        assert_eq!(schedule.installments[0].interest, 5_000.0);
        assert_eq!(schedule.monthly_total, 23_536.74);

        // Interest falls as the balance falls
        for pair in schedule.installments.windows(2) {
            assert!(pair[1].interest <= pair[0].interest);
            assert!(pair[1].balance_after < pair[0].balance_after);
        }

        let recovered: f64 = schedule.installments.iter().map(|i| i.principal).sum();
        assert!((recovered - 500_000.0).abs() < 1e-6);
        let interest: f64 = schedule.installments.iter().map(|i| i.interest).sum();
        assert!((interest - schedule.total_interest).abs() < 1e-6);
    }

    #[test]
    fn test_reducing_schedule_without_interest() {
        let schedule = calculate_loan_schedule(90_000.0, 0.0, 3, InterestMethod::Reducing).unwrap();
        assert_eq!(schedule.monthly_total, 30_000.0);
        assert_eq!(schedule.total_interest, 0.0);
    }

    #[test]
    fn test_schedule_validation() {
        assert!(calculate_loan_schedule(0.0, 5.0, 12, InterestMethod::Flat).is_err());
        assert!(calculate_loan_schedule(1_000.0, -1.0, 12, InterestMethod::Flat).is_err());
        assert!(calculate_loan_schedule(1_000.0, 5.0, 0, InterestMethod::Flat).is_err());
        assert!(calculate_loan_schedule(1_000.0, 5.0, 361, InterestMethod::Reducing).is_err());
    }

    #[tokio::test]
    async fn test_create_loan_creates_repayment_deduction() -> Result<()> {
        let db = setup_test_db().await?;
        let staff = create_test_staff(&db, "S-001").await?;

        let outcome = create_loan(&db, &admin(), flat_loan(staff.id, 120_000.0, 12)).await?;
        let created = outcome.value;
        assert_eq!(created.loan.remaining_balance, 120_000.0);
        assert_eq!(created.loan.status, LoanStatus::Active);
        assert!(created.deduction.is_loan_repayment);
        assert_eq!(created.deduction.loan_id, Some(created.loan.id));
        assert_eq!(created.deduction.amount, 11_000.0);
        assert_eq!(outcome.notifications.len(), 1);
        assert_eq!(audit_count(&db, "loan.create").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_loan_requires_capability() -> Result<()> {
        let db = setup_test_db().await?;
        let staff = create_test_staff(&db, "S-001").await?;

        let hr = Actor::new("hr", Role::HrAdmin);
        let result = create_loan(&db, &hr, flat_loan(staff.id, 10_000.0, 2)).await;
        assert!(matches!(result, Err(Error::Forbidden { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_loan_for_unknown_staff() -> Result<()> {
        let db = setup_test_db().await?;
        let result = create_loan(&db, &admin(), flat_loan(99, 10_000.0, 2)).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_flat_installments_track_balance_until_paid_off() -> Result<()> {
        let db = setup_test_db().await?;
        let staff = create_test_staff(&db, "S-001").await?;
        let loan = create_loan(&db, &admin(), flat_loan(staff.id, 120_000.0, 12))
            .await?
            .value
            .loan;

        for n in 1..=12 {
            let applied = apply_loan_installment(&db, loan.id).await?;
            assert_eq!(applied.loan.installments_paid, n);
            assert_eq!(
                applied.loan.remaining_balance,
                120_000.0 - f64::from(n) * loan.monthly_principal
            );
            if n < 12 {
                assert_eq!(applied.loan.status, LoanStatus::Active);
            } else {
                assert_eq!(applied.loan.status, LoanStatus::PaidOff);
            }
        }

        let result = apply_loan_installment(&db, loan.id).await;
        assert!(matches!(result, Err(Error::StateConflict { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_repayment_schedule_marks_paid_installments() -> Result<()> {
        let db = setup_test_db().await?;
        let staff = create_test_staff(&db, "S-001").await?;
        let loan = create_loan(&db, &admin(), flat_loan(staff.id, 30_000.0, 3))
            .await?
            .value
            .loan;
        apply_loan_installment(&db, loan.id).await?;

        let (_, rows) = get_loan_repayment_schedule(&db, loan.id).await?;
        assert_eq!(rows.len(), 3);
        assert!(rows[0].paid);
        assert!(!rows[1].paid);
        assert!(!rows[2].paid);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_loan_cancels_deduction_and_blocks_installments() -> Result<()> {
        let db = setup_test_db().await?;
        let staff = create_test_staff(&db, "S-001").await?;
        let created = create_loan(&db, &admin(), flat_loan(staff.id, 30_000.0, 3))
            .await?
            .value;

        let cancelled = cancel_loan(&db, &admin(), created.loan.id).await?.value;
        assert_eq!(cancelled.status, LoanStatus::Cancelled);

        let deduction = IndividualDeduction::find_by_id(created.deduction.id)
            .one(&db)
            .await?
            .unwrap();
        assert_eq!(
            deduction.status,
            individual_deduction::DeductionStatus::Cancelled
        );

        let result = apply_loan_installment(&db, created.loan.id).await;
        assert!(matches!(result, Err(Error::StateConflict { .. })));

        let again = cancel_loan(&db, &admin(), created.loan.id).await;
        assert!(matches!(again, Err(Error::StateConflict { .. })));
        Ok(())
    }
}
