//! Domain errors for the flotilla fleet commander.

use std::time::Duration;
use thiserror::Error;

/// Domain-level errors raised by fleet state, the supervisor and the commander.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid state transition for {agent} from {from} to {to}")]
    InvalidStateTransition {
        agent: String,
        from: String,
        to: String,
    },

    #[error("Double assignment: {objective} is already held by {holder}")]
    DoubleAssignment { objective: String, holder: String },

    #[error("Plan references unknown agent: {0}")]
    UnknownAgentInPlan(String),

    #[error("Agent {0} already has a running task")]
    AlreadyRunning(String),

    #[error("No mission registered for objective kind: {0}")]
    MissionNotRegistered(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl DomainError {
    /// Invariant violations abort a commander cycle and trigger a retry from a
    /// fresh snapshot.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::DoubleAssignment { .. }
                | Self::UnknownAgentInPlan(_)
                | Self::AlreadyRunning(_)
                | Self::InvalidStateTransition { .. }
                | Self::InvariantViolation(_)
        )
    }
}

/// Result type for fleet state, plans and operator commands.
pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Request scheduler failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Permit not granted within {waited:?}")]
    Timeout { waited: Duration },

    #[error("Scheduler is closed")]
    Closed,
}

/// Failures reported by the remote call client.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Transient remote failure: {0}")]
    Transient(String),

    #[error("Remote rejected request ({status}): {message}")]
    Permanent { status: u16, message: String },

    #[error("Failed to decode remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Worth retrying after backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Failures surfaced inside a running mission.
#[derive(Debug, Error)]
pub enum MissionError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Mission cancelled")]
    Cancelled,

    #[error("Protocol error: {0}")]
    Protocol(String),
}
