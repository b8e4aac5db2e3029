//! Payroll run workflow - the legal transitions and what each one produces.
//!
//! ```text
//! draft --submit--> pending_review --approve--> approved --process--> processed
//!   ^                    |                                               |
//!   +------reject--------+                                               |
//!   +------------------------------reopen--------------------------------+
//! ```
//!
//! Planning a transition touches no storage. The orchestrator in `core::payroll` applies
//! the returned [`WorkflowStep`] as a compare-and-set on `from`.

use super::effects::{AuditRecord, Notification, NotificationKind};
use super::role::{Actor, Capability, Role};
use crate::{
    entities::{payroll_run, payroll_run::PayrollStatus},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A workflow action on an existing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayrollAction {
    /// Send a draft for review
    Submit,
    /// Accept a run under review
    Approve,
    /// Return a run under review to draft
    Reject,
    /// Generate payslips and lock the run
    Process,
    /// Unlock a processed run, discarding its payslips
    Reopen,
}

impl PayrollAction {
    /// Name used in audit entries, e.g. `payroll_run.approve`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Process => "process",
            Self::Reopen => "reopen",
        }
    }

    /// Capability an actor needs to perform the action.
    #[must_use]
    pub const fn capability(self) -> Capability {
        match self {
            Self::Submit => Capability::SubmitPayrollRun,
            Self::Approve => Capability::ApprovePayrollRun,
            Self::Reject => Capability::RejectPayrollRun,
            Self::Process => Capability::ProcessPayrollRun,
            Self::Reopen => Capability::ReopenPayrollRun,
        }
    }

    /// Status the run must be in.
    #[must_use]
    pub const fn source(self) -> PayrollStatus {
        match self {
            Self::Submit => PayrollStatus::Draft,
            Self::Approve | Self::Reject => PayrollStatus::PendingReview,
            Self::Process => PayrollStatus::Approved,
            Self::Reopen => PayrollStatus::Processed,
        }
    }

    /// Status the run ends in.
    #[must_use]
    pub const fn target(self) -> PayrollStatus {
        match self {
            Self::Submit => PayrollStatus::PendingReview,
            Self::Approve => PayrollStatus::Approved,
            Self::Process => PayrollStatus::Processed,
            Self::Reject | Self::Reopen => PayrollStatus::Draft,
        }
    }

    /// Roles told about the transition.
    const fn audience(self) -> &'static [Role] {
        match self {
            Self::Submit => &[Role::AccountAdmin, Role::SuperAdmin],
            Self::Approve => &[Role::PayrollAdmin, Role::SuperAdmin],
            Self::Reject => &[Role::PayrollAdmin],
            Self::Process => &[Role::PayrollAdmin, Role::AccountAdmin],
            Self::Reopen => &[Role::SuperAdmin, Role::PayrollAdmin, Role::AccountAdmin],
        }
    }
}

impl std::fmt::Display for PayrollAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A planned transition: the new column values plus its audit and notification intents
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    /// Run being moved
    pub run_id: i64,
    /// Action being applied
    pub action: PayrollAction,
    /// Status the update is conditional on
    pub from: PayrollStatus,
    /// Status after the update
    pub to: PayrollStatus,
    /// New `approved_by`
    pub approved_by: Option<String>,
    /// New `processed_at`
    pub processed_at: Option<DateTime<Utc>>,
    /// Audit entry to write with the update
    pub audit: AuditRecord,
    /// Notifications to dispatch after commit
    pub notifications: Vec<Notification>,
}

/// Plans `action` on `run` for `actor`.
///
/// # Errors
/// [`Error::Forbidden`] if the actor's role lacks the action's capability,
/// [`Error::StateConflict`] if the run is not in the action's source status.
pub fn plan_transition(
    run: &payroll_run::Model,
    action: PayrollAction,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<WorkflowStep> {
    actor.require(action.capability())?;

    let from = action.source();
    if run.status != from {
        let reason = if run.status.is_locked() {
            "the run is processed and locked until reopened".to_string()
        } else {
            format!("expected {from}")
        };
        return Err(Error::conflict(format!(
            "Cannot {action} payroll run {} in status {}: {reason}",
            run.id, run.status
        )));
    }
    let to = action.target();

    let (approved_by, processed_at) = match action {
        PayrollAction::Submit => (run.approved_by.clone(), run.processed_at),
        PayrollAction::Approve => (Some(actor.user_id.clone()), run.processed_at),
        PayrollAction::Process => (run.approved_by.clone(), Some(now)),
        PayrollAction::Reject | PayrollAction::Reopen => (None, None),
    };

    let audit = AuditRecord::new(
        &actor.user_id,
        format!("payroll_run.{action}"),
        "payroll_runs",
        run.id,
    )
    .with_old(json!({
        "status": from,
        "approved_by": run.approved_by,
        "processed_at": run.processed_at,
    }))
    .with_new(json!({
        "status": to,
        "approved_by": approved_by,
        "processed_at": processed_at,
    }));

    let scope = run
        .department
        .as_deref()
        .map_or_else(String::new, |department| format!(" ({department})"));
    let (title, message, kind) = match action {
        PayrollAction::Submit => (
            "Payroll awaiting approval",
            format!("Payroll for {}{scope} was submitted for review.", run.period),
            NotificationKind::ActionRequired,
        ),
        PayrollAction::Approve => (
            "Payroll approved",
            format!("Payroll for {}{scope} was approved and can be processed.", run.period),
            NotificationKind::Success,
        ),
        PayrollAction::Reject => (
            "Payroll rejected",
            format!("Payroll for {}{scope} was returned to draft.", run.period),
            NotificationKind::Warning,
        ),
        PayrollAction::Process => (
            "Payroll processed",
            format!("Payslips for {}{scope} have been generated.", run.period),
            NotificationKind::Success,
        ),
        PayrollAction::Reopen => (
            "Payroll reopened",
            format!(
                "Processed payroll for {}{scope} was reopened by {} and its payslips removed.",
                run.period, actor.user_id
            ),
            NotificationKind::Warning,
        ),
    };

    Ok(WorkflowStep {
        run_id: run.id,
        action,
        from,
        to,
        approved_by,
        processed_at,
        audit,
        notifications: Notification::to_roles(action.audience(), title, &message, kind),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::effects::Recipient;

    fn run(status: PayrollStatus) -> payroll_run::Model {
        let now = Utc::now();
        payroll_run::Model {
            id: 1,
            period: "2024-06".to_string(),
            department: None,
            status,
            staff_count: 0,
            gross_amount: 0.0,
            total_deductions: 0.0,
            net_amount: 0.0,
            created_by: "payroll".to_string(),
            approved_by: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn super_admin() -> Actor {
        Actor::new("root", Role::SuperAdmin)
    }

    #[test]
    fn test_happy_path_sequence() {
        let now = Utc::now();
        let mut current = run(PayrollStatus::Draft);
        for (action, expected) in [
            (PayrollAction::Submit, PayrollStatus::PendingReview),
            (PayrollAction::Approve, PayrollStatus::Approved),
            (PayrollAction::Process, PayrollStatus::Processed),
            (PayrollAction::Reopen, PayrollStatus::Draft),
        ] {
            let step = plan_transition(&current, action, &super_admin(), now).unwrap();
            assert_eq!(step.from, current.status);
            assert_eq!(step.to, expected);
            current.status = step.to;
            current.approved_by = step.approved_by;
            current.processed_at = step.processed_at;
        }
        assert_eq!(current.approved_by, None);
        assert_eq!(current.processed_at, None);
    }

    #[test]
    fn test_approve_records_approver_and_process_records_time() {
        let now = Utc::now();
        let accounts = Actor::new("accounts", Role::AccountAdmin);
        let step = plan_transition(
            &run(PayrollStatus::PendingReview),
            PayrollAction::Approve,
            &accounts,
            now,
        )
        .unwrap();
        assert_eq!(step.approved_by.as_deref(), Some("accounts"));
        assert_eq!(step.audit.action, "payroll_run.approve");

        let mut approved = run(PayrollStatus::Approved);
        approved.approved_by = Some("accounts".to_string());
        let step =
            plan_transition(&approved, PayrollAction::Process, &super_admin(), now).unwrap();
        assert_eq!(step.processed_at, Some(now));
        assert_eq!(step.approved_by.as_deref(), Some("accounts"));
    }

    #[test]
    fn test_wrong_source_status_is_a_conflict() {
        let now = Utc::now();
        let result = plan_transition(
            &run(PayrollStatus::Draft),
            PayrollAction::Approve,
            &super_admin(),
            now,
        );
        assert!(matches!(result, Err(Error::StateConflict { .. })));

        let locked = plan_transition(
            &run(PayrollStatus::Processed),
            PayrollAction::Process,
            &super_admin(),
            now,
        );
        match locked {
            Err(Error::StateConflict { message }) => assert!(message.contains("locked")),
            other => panic!("expected conflict, got {other:?}"),
        }

        let approve_processed = plan_transition(
            &run(PayrollStatus::Processed),
            PayrollAction::Approve,
            &super_admin(),
            now,
        );
        assert!(matches!(approve_processed, Err(Error::StateConflict { .. })));
    }

    #[test]
    fn test_roles_are_enforced() {
        let now = Utc::now();
        let payroll = Actor::new("payroll", Role::PayrollAdmin);
        let approve = plan_transition(
            &run(PayrollStatus::PendingReview),
            PayrollAction::Approve,
            &payroll,
            now,
        );
        assert!(matches!(
            approve,
            Err(Error::Forbidden {
                capability: Capability::ApprovePayrollRun,
                ..
            })
        ));

        let accounts = Actor::new("accounts", Role::AccountAdmin);
        let process = plan_transition(
            &run(PayrollStatus::Approved),
            PayrollAction::Process,
            &accounts,
            now,
        );
        assert!(matches!(process, Err(Error::Forbidden { .. })));

        let reopen = plan_transition(
            &run(PayrollStatus::Processed),
            PayrollAction::Reopen,
            &payroll,
            now,
        );
        assert!(matches!(reopen, Err(Error::Forbidden { .. })));
    }

    #[test]
    fn test_reopen_notifies_every_admin() {
        let mut processed = run(PayrollStatus::Processed);
        processed.approved_by = Some("accounts".to_string());
        let step =
            plan_transition(&processed, PayrollAction::Reopen, &super_admin(), Utc::now()).unwrap();

        let recipients: Vec<_> = step.notifications.iter().map(|n| n.recipient.clone()).collect();
        assert_eq!(
            recipients,
            vec![
                Recipient::Role(Role::SuperAdmin),
                Recipient::Role(Role::PayrollAdmin),
                Recipient::Role(Role::AccountAdmin),
            ]
        );
        assert_eq!(step.audit.old_values.as_ref().unwrap()["status"], "processed");
        assert_eq!(step.audit.new_values.as_ref().unwrap()["status"], "draft");
        assert_eq!(step.audit.old_values.as_ref().unwrap()["approved_by"], "accounts");
    }

    #[test]
    fn test_reject_returns_to_draft() {
        let accounts = Actor::new("accounts", Role::AccountAdmin);
        let step = plan_transition(
            &run(PayrollStatus::PendingReview),
            PayrollAction::Reject,
            &accounts,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(step.to, PayrollStatus::Draft);
        assert_eq!(step.notifications.len(), 1);
    }
}
