//! Roles and capabilities.
//!
//! Every guarded operation asks for a [`Capability`]; each [`Role`] grants a fixed set of
//! them. Workflow guards never compare role names directly.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Administrative role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Unrestricted administrator
    SuperAdmin,
    /// Prepares payroll runs and adjustments
    PayrollAdmin,
    /// Reviews and approves payroll runs
    AccountAdmin,
    /// Manages staff leave
    HrAdmin,
    /// Ordinary staff member
    Staff,
}

/// An operation that requires authorisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Create a payroll run in draft
    CreatePayrollRun,
    /// Move a draft run to pending review
    SubmitPayrollRun,
    /// Recompute a draft run
    RerunPayroll,
    /// Approve a run under review
    ApprovePayrollRun,
    /// Send a run under review back to draft
    RejectPayrollRun,
    /// Generate payslips for an approved run
    ProcessPayrollRun,
    /// Unlock a processed run
    ReopenPayrollRun,
    /// Approve or reject leave requests
    ReviewLeave,
    /// Administer leave on behalf of staff
    ManageLeave,
    /// Create and cancel loans
    ManageLoans,
    /// Create and cancel individual allowances and deductions
    ManageAdjustments,
}

impl Capability {
    /// Human-readable description used in error messages
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatePayrollRun => "create payroll runs",
            Self::SubmitPayrollRun => "submit payroll runs",
            Self::RerunPayroll => "rerun payroll",
            Self::ApprovePayrollRun => "approve payroll runs",
            Self::RejectPayrollRun => "reject payroll runs",
            Self::ProcessPayrollRun => "process payroll runs",
            Self::ReopenPayrollRun => "reopen payroll runs",
            Self::ReviewLeave => "review leave requests",
            Self::ManageLeave => "manage leave",
            Self::ManageLoans => "manage loans",
            Self::ManageAdjustments => "manage individual adjustments",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Role {
    /// Stable lowercase name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::PayrollAdmin => "payroll_admin",
            Self::AccountAdmin => "account_admin",
            Self::HrAdmin => "hr_admin",
            Self::Staff => "staff",
        }
    }

    /// Capabilities granted to the role.
    #[must_use]
    pub const fn capabilities(self) -> &'static [Capability] {
        use Capability as C;
        match self {
            Self::SuperAdmin => &[
                C::CreatePayrollRun,
                C::SubmitPayrollRun,
                C::RerunPayroll,
                C::ApprovePayrollRun,
                C::RejectPayrollRun,
                C::ProcessPayrollRun,
                C::ReopenPayrollRun,
                C::ReviewLeave,
                C::ManageLeave,
                C::ManageLoans,
                C::ManageAdjustments,
            ],
            Self::PayrollAdmin => &[
                C::CreatePayrollRun,
                C::SubmitPayrollRun,
                C::RerunPayroll,
                C::ManageLoans,
                C::ManageAdjustments,
            ],
            Self::AccountAdmin => &[C::ApprovePayrollRun, C::RejectPayrollRun, C::ManageLoans],
            Self::HrAdmin => &[C::ReviewLeave, C::ManageLeave],
            Self::Staff => &[],
        }
    }

    /// Whether the role grants `capability`.
    #[must_use]
    pub fn can(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Roles that hold `capability`, used to address notifications.
    #[must_use]
    pub fn holders_of(capability: Capability) -> Vec<Self> {
        [
            Self::SuperAdmin,
            Self::PayrollAdmin,
            Self::AccountAdmin,
            Self::HrAdmin,
            Self::Staff,
        ]
        .into_iter()
        .filter(|role| role.can(capability))
        .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "super_admin" => Ok(Self::SuperAdmin),
            "payroll_admin" => Ok(Self::PayrollAdmin),
            "account_admin" => Ok(Self::AccountAdmin),
            "hr_admin" => Ok(Self::HrAdmin),
            "staff" => Ok(Self::Staff),
            other => Err(Error::validation(format!("Unknown role '{other}'"))),
        }
    }
}

/// The user performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Identifier recorded in audit entries
    pub user_id: String,
    /// Role used for authorisation
    pub role: Role,
    /// Staff record of the user, when the user is also on the payroll
    pub staff_id: Option<i64>,
}

impl Actor {
    /// An actor without a staff record.
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            staff_id: None,
        }
    }

    /// Links the actor to their own staff record.
    #[must_use]
    pub const fn with_staff_id(mut self, staff_id: i64) -> Self {
        self.staff_id = Some(staff_id);
        self
    }

    /// Fails with [`Error::Forbidden`] unless the actor's role grants `capability`.
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.role.can(capability) {
            Ok(())
        } else {
            Err(Error::Forbidden {
                role: self.role,
                capability,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_super_admin_holds_every_capability() {
        for role in [Role::PayrollAdmin, Role::AccountAdmin, Role::HrAdmin] {
            for capability in role.capabilities() {
                assert!(Role::SuperAdmin.can(*capability));
            }
        }
    }

    #[test]
    fn test_payroll_roles_are_separated() {
        assert!(Role::PayrollAdmin.can(Capability::SubmitPayrollRun));
        assert!(!Role::PayrollAdmin.can(Capability::ApprovePayrollRun));
        assert!(Role::AccountAdmin.can(Capability::ApprovePayrollRun));
        assert!(!Role::AccountAdmin.can(Capability::ProcessPayrollRun));
        assert!(!Role::AccountAdmin.can(Capability::ReopenPayrollRun));
        assert!(Role::Staff.capabilities().is_empty());
    }

    #[test]
    fn test_require_reports_role_and_capability() {
        let actor = Actor::new("u1", Role::PayrollAdmin);
        assert!(actor.require(Capability::CreatePayrollRun).is_ok());
        let err = actor.require(Capability::ReopenPayrollRun).unwrap_err();
        assert!(matches!(
            err,
            Error::Forbidden {
                role: Role::PayrollAdmin,
                capability: Capability::ReopenPayrollRun
            }
        ));
        assert_eq!(
            err.to_string(),
            "Role payroll_admin is not permitted to reopen payroll runs"
        );
    }

    #[test]
    fn test_holders_of() {
        assert_eq!(
            Role::holders_of(Capability::ReopenPayrollRun),
            vec![Role::SuperAdmin]
        );
        assert_eq!(
            Role::holders_of(Capability::ReviewLeave),
            vec![Role::SuperAdmin, Role::HrAdmin]
        );
    }

    #[test]
    fn test_role_round_trips_through_its_name() {
        for role in [Role::SuperAdmin, Role::HrAdmin, Role::Staff] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("root".parse::<Role>().is_err());
    }
}
