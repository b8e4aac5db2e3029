//! Side-effect intents produced by mutating operations.
//!
//! Audit records are written through the same connection (and transaction) as the
//! mutation they describe. Notifications are returned to the caller inside an
//! [`Outcome`] and dispatched after commit; delivery is best-effort and never affects
//! whether the operation succeeded.

use super::role::Role;
use crate::{
    entities::audit_log,
    errors::Result,
};
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Actor id recorded for scheduled batch jobs
pub const SYSTEM_ACTOR: &str = "system";

/// A pending audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// User who performed the action
    pub actor_id: String,
    /// Action name, e.g. `"payroll_run.submit"`
    pub action: String,
    /// Resource kind
    pub resource: String,
    /// Identifier of the affected record
    pub resource_id: String,
    /// Changed fields before the action; `None` for creations
    pub old_values: Option<Value>,
    /// Changed fields after the action
    pub new_values: Option<Value>,
}

impl AuditRecord {
    /// Starts an audit record for `resource`/`resource_id`.
    pub fn new(
        actor_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        resource_id: impl ToString,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            action: action.into(),
            resource: resource.into(),
            resource_id: resource_id.to_string(),
            old_values: None,
            new_values: None,
        }
    }

    /// Sets the before snapshot.
    #[must_use]
    pub fn with_old(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    /// Sets the after snapshot.
    #[must_use]
    pub fn with_new(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }
}

/// Persists an audit record through `db`.
pub async fn record_audit<C>(db: &C, record: &AuditRecord) -> Result<audit_log::Model>
where
    C: ConnectionTrait,
{
    let entry = audit_log::ActiveModel {
        actor_id: Set(record.actor_id.clone()),
        action: Set(record.action.clone()),
        resource: Set(record.resource.clone()),
        resource_id: Set(record.resource_id.clone()),
        old_values: Set(record.old_values.as_ref().map(Value::to_string)),
        new_values: Set(record.new_values.as_ref().map(Value::to_string)),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    };
    Ok(entry.insert(db).await?)
}

/// Who a notification is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    /// A specific user account
    User(String),
    /// The user linked to a staff record
    Staff(i64),
    /// Every user holding a role
    Role(Role),
}

/// Category of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Neutral information
    Info,
    /// Something completed successfully
    Success,
    /// Something needs attention
    Warning,
    /// Someone must act
    ActionRequired,
}

/// A notification intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Addressee
    pub recipient: Recipient,
    /// Short headline
    pub title: String,
    /// Body text
    pub message: String,
    /// Category
    #[serde(rename = "type")]
    pub kind: NotificationKind,
}

impl Notification {
    /// Builds a notification.
    pub fn new(
        recipient: Recipient,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
    ) -> Self {
        Self {
            recipient,
            title: title.into(),
            message: message.into(),
            kind,
        }
    }

    /// The same notification addressed to each of `roles`.
    pub fn to_roles(
        roles: &[Role],
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Vec<Self> {
        roles
            .iter()
            .map(|role| Self::new(Recipient::Role(*role), title, message, kind))
            .collect()
    }
}

/// Result of a mutating operation: the value plus notifications still to be dispatched.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    /// What the operation produced
    pub value: T,
    /// Notifications to hand to a notification sink
    pub notifications: Vec<Notification>,
}

impl<T> Outcome<T> {
    /// An outcome with notifications.
    pub const fn new(value: T, notifications: Vec<Notification>) -> Self {
        Self {
            value,
            notifications,
        }
    }

    /// An outcome that notifies nobody.
    pub const fn silent(value: T) -> Self {
        Self {
            value,
            notifications: Vec::new(),
        }
    }
}
