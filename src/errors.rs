//! Unified error type for the payroll engine.
//!
//! Validation, not-found and state-conflict errors are surfaced to the caller as-is.
//! Database errors are the persistence port failing and are never retried here.

use crate::core::role::{Capability, Role};
use thiserror::Error;

/// All errors produced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or inconsistent input
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what was rejected
        message: String,
    },

    /// A referenced record does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up
        entity: &'static str,
        /// Identifier that was used for the lookup
        id: String,
    },

    /// Not enough leave days (or loan balance) to satisfy a request
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount that was asked for
        requested: f64,
        /// Amount that is actually available
        available: f64,
    },

    /// Illegal transition, mutation of a locked record, or a lost status race
    #[error("State conflict: {message}")]
    StateConflict {
        /// Description of the conflicting state
        message: String,
    },

    /// The acting role lacks the capability required for the operation
    #[error("Role {role} is not permitted to {capability}")]
    Forbidden {
        /// Role of the actor
        role: Role,
        /// Capability that was required
        capability: Capability,
    },

    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem
        message: String,
    },

    /// Failure of the persistence port
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// A stored JSON payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a [`Error::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::StateConflict`] error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::NotFound`] error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether this error came from a single staff member's pay calculation
    /// rather than from the persistence layer. Bulk processing skips these.
    #[must_use]
    pub const fn is_calculation_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::NotFound { .. } | Self::Serialization(_)
        )
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
