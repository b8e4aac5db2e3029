//! Leave accrual & balance ledger.
//!
//! Balances are kept per staff member, leave type and calendar year. A request counts
//! working days only, and draws from the balance of the year it starts in. Approval
//! debits the balance with a conditional update in the same transaction as the status
//! change, so two approvals racing for the last few days cannot both succeed.

use super::effects::{
    AuditRecord, Notification, NotificationKind, Outcome, Recipient, SYSTEM_ACTOR, record_audit,
};
use super::period::Period;
use super::role::{Actor, Capability, Role};
use crate::{
    entities::{
        LeaveAccrual, LeaveBalance, LeaveRequest, LeaveType, leave_accrual, leave_balance,
        leave_request, leave_request::LeaveStatus, leave_type,
    },
    errors::{Error, Result},
};
use chrono::{Datelike, NaiveDate, Weekday};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument};

/// Counts Monday-to-Friday days between `start` and `end`, both inclusive.
/// Returns 0 when `end` precedes `start`.
#[must_use]
pub fn calculate_working_days(start: NaiveDate, end: NaiveDate) -> i64 {
    if end < start {
        return 0;
    }
    let count = start
        .iter_days()
        .take_while(|day| *day <= end)
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .count();
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// Loads a leave type, failing with [`Error::Validation`] when it does not exist.
pub async fn get_leave_type<C>(db: &C, leave_type_id: i64) -> Result<leave_type::Model>
where
    C: ConnectionTrait,
{
    LeaveType::find_by_id(leave_type_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::validation(format!("Unknown leave type {leave_type_id}")))
}

/// A staff member's balance for one leave type and year, if initialized.
pub async fn get_leave_balance<C>(
    db: &C,
    staff_id: i64,
    leave_type_id: i64,
    year: i32,
) -> Result<Option<leave_balance::Model>>
where
    C: ConnectionTrait,
{
    LeaveBalance::find()
        .filter(leave_balance::Column::StaffId.eq(staff_id))
        .filter(leave_balance::Column::LeaveTypeId.eq(leave_type_id))
        .filter(leave_balance::Column::Year.eq(year))
        .one(db)
        .await
        .map_err(Into::into)
}

/// All of a staff member's balances for a year.
pub async fn get_leave_balances_for_staff<C>(
    db: &C,
    staff_id: i64,
    year: i32,
) -> Result<Vec<leave_balance::Model>>
where
    C: ConnectionTrait,
{
    LeaveBalance::find()
        .filter(leave_balance::Column::StaffId.eq(staff_id))
        .filter(leave_balance::Column::Year.eq(year))
        .order_by_asc(leave_balance::Column::LeaveTypeId)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Checks that `requested` days can be taken.
///
/// Unpaid leave never draws from a balance and always passes.
///
/// # Errors
/// [`Error::Validation`] for an unknown leave type, [`Error::InsufficientBalance`] when a
/// paid type has no balance row for the year or too few remaining days.
pub async fn check_leave_balance<C>(
    db: &C,
    staff_id: i64,
    leave_type_id: i64,
    requested: f64,
    year: i32,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let leave_type = get_leave_type(db, leave_type_id).await?;
    if !leave_type.is_paid {
        return Ok(());
    }

    let available = get_leave_balance(db, staff_id, leave_type_id, year)
        .await?
        .map_or(0.0, |balance| balance.remaining_days);
    if available < requested {
        return Err(Error::InsufficientBalance {
            requested,
            available,
        });
    }
    Ok(())
}

/// Debits `days` from a balance, only if enough days remain at the moment of the update.
async fn debit_leave_balance<C>(
    db: &C,
    staff_id: i64,
    leave_type_id: i64,
    year: i32,
    days: f64,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = LeaveBalance::update_many()
        .col_expr(
            leave_balance::Column::UsedDays,
            Expr::col(leave_balance::Column::UsedDays).add(days),
        )
        .col_expr(
            leave_balance::Column::RemainingDays,
            Expr::col(leave_balance::Column::RemainingDays).sub(days),
        )
        .filter(leave_balance::Column::StaffId.eq(staff_id))
        .filter(leave_balance::Column::LeaveTypeId.eq(leave_type_id))
        .filter(leave_balance::Column::Year.eq(year))
        .filter(leave_balance::Column::RemainingDays.gte(days))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        let available = get_leave_balance(db, staff_id, leave_type_id, year)
            .await?
            .map_or(0.0, |balance| balance.remaining_days);
        return Err(Error::InsufficientBalance {
            requested: days,
            available,
        });
    }
    Ok(())
}

/// Input for [`submit_leave_request`]
#[derive(Debug, Clone)]
pub struct NewLeaveRequest {
    /// Staff member taking leave
    pub staff_id: i64,
    /// Leave type drawn from
    pub leave_type_id: i64,
    /// First day of leave
    pub start_date: NaiveDate,
    /// Last day of leave, inclusive
    pub end_date: NaiveDate,
    /// Free-text reason
    pub reason: Option<String>,
}

fn is_own_record(actor: &Actor, staff_id: i64) -> bool {
    actor.staff_id == Some(staff_id)
}

/// Submits a leave request for review.
///
/// Staff may submit for themselves; leave managers may submit for anyone. Leave types
/// that do not require approval are approved (and debited) immediately.
#[instrument(
    skip(db, actor, request),
    fields(actor = %actor.user_id, staff_id = request.staff_id)
)]
pub async fn submit_leave_request(
    db: &DatabaseConnection,
    actor: &Actor,
    request: NewLeaveRequest,
) -> Result<Outcome<leave_request::Model>> {
    if !is_own_record(actor, request.staff_id) {
        actor.require(Capability::ManageLeave)?;
    }
    if request.end_date < request.start_date {
        return Err(Error::validation("Leave end date precedes its start date"));
    }
    let working_days = calculate_working_days(request.start_date, request.end_date);
    if working_days == 0 {
        return Err(Error::validation(
            "Leave request covers no working days",
        ));
    }
    let total_days = i32::try_from(working_days)
        .map_err(|_| Error::validation("Leave request is too long"))?;
    let days = f64::from(total_days);
    let year = request.start_date.year();

    let txn = db.begin().await?;
    super::staff::get_staff(&txn, request.staff_id).await?;
    let leave_type = get_leave_type(&txn, request.leave_type_id).await?;
    if !leave_type.is_active {
        return Err(Error::validation(format!(
            "Leave type '{}' is not active",
            leave_type.name
        )));
    }
    if leave_type.max_days_per_year > 0.0 && days > leave_type.max_days_per_year {
        return Err(Error::validation(format!(
            "{days} days exceeds the {} day yearly limit for {}",
            leave_type.max_days_per_year, leave_type.name
        )));
    }

    let overlapping = LeaveRequest::find()
        .filter(leave_request::Column::StaffId.eq(request.staff_id))
        .filter(
            leave_request::Column::Status.is_in([LeaveStatus::Pending, LeaveStatus::Approved]),
        )
        .filter(leave_request::Column::StartDate.lte(request.end_date))
        .filter(leave_request::Column::EndDate.gte(request.start_date))
        .one(&txn)
        .await?;
    if let Some(existing) = overlapping {
        return Err(Error::conflict(format!(
            "Leave overlaps request {} ({} to {})",
            existing.id, existing.start_date, existing.end_date
        )));
    }

    check_leave_balance(&txn, request.staff_id, request.leave_type_id, days, year).await?;

    let now = chrono::Utc::now();
    let auto_approve = !leave_type.requires_approval;
    let created = leave_request::ActiveModel {
        staff_id: Set(request.staff_id),
        leave_type_id: Set(request.leave_type_id),
        start_date: Set(request.start_date),
        end_date: Set(request.end_date),
        total_days: Set(total_days),
        reason: Set(request.reason),
        status: Set(if auto_approve {
            LeaveStatus::Approved
        } else {
            LeaveStatus::Pending
        }),
        reviewed_by: Set(auto_approve.then(|| actor.user_id.clone())),
        reviewed_at: Set(auto_approve.then_some(now)),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if auto_approve && leave_type.is_paid {
        debit_leave_balance(&txn, created.staff_id, created.leave_type_id, year, days).await?;
    }

    record_audit(
        &txn,
        &AuditRecord::new(&actor.user_id, "leave_request.create", "leave_requests", created.id)
            .with_new(json!({
                "staff_id": created.staff_id,
                "leave_type_id": created.leave_type_id,
                "start_date": created.start_date,
                "end_date": created.end_date,
                "total_days": created.total_days,
                "status": created.status,
            })),
    )
    .await?;
    txn.commit().await?;

    let notifications = if auto_approve {
        vec![Notification::new(
            Recipient::Staff(created.staff_id),
            "Leave approved",
            format!(
                "Your {} from {} to {} has been approved.",
                leave_type.name, created.start_date, created.end_date
            ),
            NotificationKind::Success,
        )]
    } else {
        Notification::to_roles(
            &Role::holders_of(Capability::ReviewLeave),
            "Leave request awaiting review",
            &format!(
                "A {} request for {total_days} working days ({} to {}) needs review.",
                leave_type.name, created.start_date, created.end_date
            ),
            NotificationKind::ActionRequired,
        )
    };
    info!(request_id = created.id, status = %created.status, "Leave request submitted");
    Ok(Outcome::new(created, notifications))
}

/// Moves a pending leave request to `approved`, `rejected` or `cancelled`.
///
/// Approving and rejecting need the leave-review capability. The requesting staff member
/// or a leave manager may cancel. Approval of paid leave debits the balance of the year
/// the leave starts in.
///
/// # Errors
/// [`Error::StateConflict`] if the request is no longer pending,
/// [`Error::InsufficientBalance`] if the balance no longer covers the request.
#[instrument(skip(db, actor), fields(actor = %actor.user_id))]
pub async fn update_leave_request_status(
    db: &DatabaseConnection,
    actor: &Actor,
    request_id: i64,
    new_status: LeaveStatus,
) -> Result<Outcome<leave_request::Model>> {
    let txn = db.begin().await?;
    let current = LeaveRequest::find_by_id(request_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Leave request", request_id))?;

    match new_status {
        LeaveStatus::Pending => {
            return Err(Error::validation("A leave request cannot be moved back to pending"));
        }
        LeaveStatus::Approved | LeaveStatus::Rejected => actor.require(Capability::ReviewLeave)?,
        LeaveStatus::Cancelled => {
            if !is_own_record(actor, current.staff_id) {
                actor.require(Capability::ManageLeave)?;
            }
        }
    }
    if current.status.is_terminal() {
        return Err(Error::conflict(format!(
            "Leave request {request_id} is already {}",
            current.status
        )));
    }

    let now = chrono::Utc::now();
    let result = LeaveRequest::update_many()
        .set(leave_request::ActiveModel {
            status: Set(new_status),
            reviewed_by: Set(Some(actor.user_id.clone())),
            reviewed_at: Set(Some(now)),
            ..Default::default()
        })
        .filter(leave_request::Column::Id.eq(request_id))
        .filter(leave_request::Column::Status.eq(LeaveStatus::Pending))
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "Leave request {request_id} was reviewed concurrently"
        )));
    }

    let leave_type = get_leave_type(&txn, current.leave_type_id).await?;
    if new_status == LeaveStatus::Approved && leave_type.is_paid {
        debit_leave_balance(
            &txn,
            current.staff_id,
            current.leave_type_id,
            current.start_date.year(),
            f64::from(current.total_days),
        )
        .await?;
    }

    record_audit(
        &txn,
        &AuditRecord::new(
            &actor.user_id,
            format!("leave_request.{}", action_name(new_status)),
            "leave_requests",
            request_id,
        )
        .with_old(json!({"status": current.status}))
        .with_new(json!({"status": new_status, "reviewed_by": actor.user_id})),
    )
    .await?;

    let updated = LeaveRequest::find_by_id(request_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Leave request", request_id))?;
    txn.commit().await?;

    let range = format!("{} to {}", updated.start_date, updated.end_date);
    let notification = match new_status {
        LeaveStatus::Approved => Notification::new(
            Recipient::Staff(updated.staff_id),
            "Leave approved",
            format!("Your {} for {range} has been approved.", leave_type.name),
            NotificationKind::Success,
        ),
        LeaveStatus::Rejected => Notification::new(
            Recipient::Staff(updated.staff_id),
            "Leave rejected",
            format!("Your {} for {range} was not approved.", leave_type.name),
            NotificationKind::Warning,
        ),
        _ => Notification::new(
            Recipient::Role(Role::HrAdmin),
            "Leave cancelled",
            format!("A {} request for {range} was cancelled.", leave_type.name),
            NotificationKind::Info,
        ),
    };
    info!(request_id, status = %new_status, "Leave request reviewed");
    Ok(Outcome::new(updated, vec![notification]))
}

const fn action_name(status: LeaveStatus) -> &'static str {
    match status {
        LeaveStatus::Pending => "create",
        LeaveStatus::Approved => "approve",
        LeaveStatus::Rejected => "reject",
        LeaveStatus::Cancelled => "cancel",
    }
}

async fn find_or_create_balance<C>(
    db: &C,
    staff_id: i64,
    leave_type_id: i64,
    year: i32,
    initial_days: f64,
) -> Result<leave_balance::Model>
where
    C: ConnectionTrait,
{
    if let Some(balance) = get_leave_balance(db, staff_id, leave_type_id, year).await? {
        return Ok(balance);
    }
    leave_balance::ActiveModel {
        staff_id: Set(staff_id),
        leave_type_id: Set(leave_type_id),
        year: Set(year),
        accrued_days: Set(initial_days),
        used_days: Set(0.0),
        carried_forward: Set(0.0),
        remaining_days: Set(initial_days),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates a staff member's balance rows for `year`, one per active leave type.
///
/// Types without monthly accrual are front-loaded with their full yearly entitlement;
/// accruing types start at zero. Existing rows are left untouched.
#[instrument(skip(db))]
pub async fn initialize_staff_leave_balances(
    db: &DatabaseConnection,
    staff_id: i64,
    year: i32,
) -> Result<Vec<leave_balance::Model>> {
    let txn = db.begin().await?;
    super::staff::get_staff(&txn, staff_id).await?;
    let existing = get_leave_balances_for_staff(&txn, staff_id, year).await?.len();

    let leave_types = LeaveType::find()
        .filter(leave_type::Column::IsActive.eq(true))
        .order_by_asc(leave_type::Column::Id)
        .all(&txn)
        .await?;
    for leave_type in &leave_types {
        let initial = if leave_type.accrual_rate > 0.0 {
            0.0
        } else {
            leave_type.max_days_per_year
        };
        find_or_create_balance(&txn, staff_id, leave_type.id, year, initial).await?;
    }

    let balances = get_leave_balances_for_staff(&txn, staff_id, year).await?;
    let created = balances.len().saturating_sub(existing);
    if created > 0 {
        record_audit(
            &txn,
            &AuditRecord::new(SYSTEM_ACTOR, "leave_balance.initialize", "staff", staff_id)
                .with_new(json!({"year": year, "balances_created": created})),
        )
        .await?;
    }
    txn.commit().await?;
    debug!(staff_id, year, created, "Leave balances initialized");
    Ok(balances)
}

/// What one accrual batch did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccrualSummary {
    /// Staff/type pairs credited this run
    pub credited: usize,
    /// Staff/type pairs already credited for the period
    pub already_accrued: usize,
    /// Staff/type pairs at their yearly cap
    pub capped: usize,
    /// Total days credited
    pub total_days: f64,
}

/// Credits one month of leave to every active staff member for every active accruing
/// leave type.
///
/// Running it twice for the same period credits nothing the second time. Accrued days
/// never exceed the type's yearly maximum (when it has one).
#[instrument(skip(db))]
pub async fn accrue_monthly_leave(
    db: &DatabaseConnection,
    period: Period,
) -> Result<AccrualSummary> {
    let txn = db.begin().await?;
    let staff = super::staff::get_active_staff(&txn).await?;
    let leave_types = LeaveType::find()
        .filter(leave_type::Column::IsActive.eq(true))
        .filter(leave_type::Column::AccrualRate.gt(0.0))
        .order_by_asc(leave_type::Column::Id)
        .all(&txn)
        .await?;

    let period_key = period.to_string();
    let mut summary = AccrualSummary::default();
    for member in &staff {
        for leave_type in &leave_types {
            let already = LeaveAccrual::find()
                .filter(leave_accrual::Column::StaffId.eq(member.id))
                .filter(leave_accrual::Column::LeaveTypeId.eq(leave_type.id))
                .filter(leave_accrual::Column::Period.eq(period_key.clone()))
                .one(&txn)
                .await?;
            if already.is_some() {
                summary.already_accrued += 1;
                continue;
            }

            let balance =
                find_or_create_balance(&txn, member.id, leave_type.id, period.year(), 0.0).await?;
            let credit = if leave_type.max_days_per_year > 0.0 {
                leave_type
                    .accrual_rate
                    .min(leave_type.max_days_per_year - balance.accrued_days)
                    .max(0.0)
            } else {
                leave_type.accrual_rate
            };

            if credit > 0.0 {
                LeaveBalance::update_many()
                    .col_expr(
                        leave_balance::Column::AccruedDays,
                        Expr::col(leave_balance::Column::AccruedDays).add(credit),
                    )
                    .col_expr(
                        leave_balance::Column::RemainingDays,
                        Expr::col(leave_balance::Column::RemainingDays).add(credit),
                    )
                    .filter(leave_balance::Column::Id.eq(balance.id))
                    .exec(&txn)
                    .await?;
                summary.credited += 1;
                summary.total_days += credit;
            } else {
                summary.capped += 1;
            }

            leave_accrual::ActiveModel {
                staff_id: Set(member.id),
                leave_type_id: Set(leave_type.id),
                period: Set(period_key.clone()),
                days: Set(credit),
                created_at: Set(chrono::Utc::now()),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            debug!(
                staff_id = member.id,
                leave_type_id = leave_type.id,
                credit,
                "Accrued leave"
            );
        }
    }

    if summary.credited + summary.capped > 0 {
        record_audit(
            &txn,
            &AuditRecord::new(SYSTEM_ACTOR, "leave_accrual.run", "leave_accruals", period)
                .with_new(serde_json::to_value(&summary)?),
        )
        .await?;
    }
    txn.commit().await?;
    info!(
        %period,
        credited = summary.credited,
        already_accrued = summary.already_accrued,
        capped = summary.capped,
        "Monthly leave accrual complete"
    );
    Ok(summary)
}

/// Carries unused days from `from_year` into the next year, at most `max_days` per
/// balance.
///
/// The carried amount is set, not added, so repeating the batch gives the same result.
/// Returns the number of balances written.
#[instrument(skip(db))]
pub async fn carry_forward_leave_balances(
    db: &DatabaseConnection,
    from_year: i32,
    max_days: f64,
) -> Result<usize> {
    if !max_days.is_finite() || max_days < 0.0 {
        return Err(Error::validation("Carry-forward cap cannot be negative"));
    }

    let txn = db.begin().await?;
    let balances = LeaveBalance::find()
        .filter(leave_balance::Column::Year.eq(from_year))
        .order_by_asc(leave_balance::Column::Id)
        .all(&txn)
        .await?;

    let to_year = from_year + 1;
    let mut written = 0;
    for balance in &balances {
        let target =
            find_or_create_balance(&txn, balance.staff_id, balance.leave_type_id, to_year, 0.0)
                .await?;
        // Never carry less than what has already been taken against the carried days.
        let carried = balance
            .remaining_days
            .min(max_days)
            .max(target.used_days - target.accrued_days)
            .max(0.0);

        let mut update: leave_balance::ActiveModel = target.clone().into();
        update.carried_forward = Set(carried);
        update.remaining_days = Set(target.accrued_days + carried - target.used_days);
        update.update(&txn).await?;
        written += 1;
    }

    if written > 0 {
        record_audit(
            &txn,
            &AuditRecord::new(
                SYSTEM_ACTOR,
                "leave_balance.carry_forward",
                "leave_balances",
                to_year,
            )
            .with_new(json!({
                "from_year": from_year,
                "to_year": to_year,
                "max_days": max_days,
                "balances_written": written,
            })),
        )
        .await?;
    }
    txn.commit().await?;
    info!(from_year, to_year, written, "Leave carried forward");
    Ok(written)
}
