//! Session-scoped notification delivery.
//!
//! [`NotificationHub`] fans notifications out over a `tokio::sync::broadcast` channel.
//! Each signed-in session holds a [`Subscription`] that only yields the notifications
//! addressed to its user, staff record or role. Dropping the subscription ends it.
//! Delivery is best-effort: with no listeners a notification is dropped, and a session
//! that falls too far behind skips what it missed.

use crate::core::effects::{Notification, Outcome, Recipient};
use crate::core::role::Actor;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

/// Default buffer capacity of the channel
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out hub for notifications produced by engine operations
#[derive(Debug, Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl NotificationHub {
    /// Creates a hub buffering up to `capacity` undelivered notifications per session.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Opens a subscription for a session.
    #[must_use]
    pub fn subscribe(&self, actor: Actor) -> Subscription {
        Subscription {
            actor,
            receiver: self.sender.subscribe(),
        }
    }

    /// Sends notifications to every open session. Returns how many were handed to at
    /// least one session.
    pub fn dispatch(&self, notifications: Vec<Notification>) -> usize {
        let mut sent = 0;
        for notification in notifications {
            match self.sender.send(notification) {
                Ok(_) => sent += 1,
                Err(broadcast::error::SendError(dropped)) => {
                    debug!(title = %dropped.title, "No open sessions, notification dropped");
                }
            }
        }
        sent
    }

    /// Dispatches an operation's notifications and returns its value.
    pub fn deliver<T>(&self, outcome: Outcome<T>) -> T {
        self.dispatch(outcome.notifications);
        outcome.value
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One session's view of the hub
#[derive(Debug)]
pub struct Subscription {
    actor: Actor,
    receiver: broadcast::Receiver<Notification>,
}

impl Subscription {
    /// Whether a notification is addressed to this session's actor.
    #[must_use]
    pub fn is_addressed_to_me(&self, notification: &Notification) -> bool {
        match &notification.recipient {
            Recipient::User(user_id) => *user_id == self.actor.user_id,
            Recipient::Staff(staff_id) => self.actor.staff_id == Some(*staff_id),
            Recipient::Role(role) => *role == self.actor.role,
        }
    }

    /// The next notification for this session, if one is already waiting.
    pub fn try_next(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) if self.is_addressed_to_me(&notification) => {
                    return Some(notification);
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(
                        user_id = %self.actor.user_id,
                        missed,
                        "Session lagged behind notifications"
                    );
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Waits for the next notification for this session. Returns `None` once the hub is
    /// gone.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) if self.is_addressed_to_me(&notification) => {
                    return Some(notification);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        user_id = %self.actor.user_id,
                        missed,
                        "Session lagged behind notifications"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
