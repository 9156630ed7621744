//! Error types for the intake call engine
//!
//! Routing-level failures (`CapacityExceeded`, `UnknownAgent`, `NotAssigned`,
//! `AgentOffline`) are recovered by their callers: the router treats them as
//! "cannot assign" and falls back to queuing. Handler failures are caught by the
//! event bus and never reach the publisher. Nothing here is fatal to the process.

use thiserror::Error;

use crate::agent::AgentId;
use crate::calls::{CallId, CallStatus};

/// Errors produced by the call engine
///
/// # Examples
///
/// ```
/// use intake_call_engine::{IntakeError, Result};
///
/// fn lookup() -> Result<()> {
///     Err(IntakeError::InvalidTopic("call_incomming".to_string()))
/// }
///
/// match lookup() {
///     Err(IntakeError::InvalidTopic(name)) => println!("typo in topic {}", name),
///     other => println!("{:?}", other),
/// }
/// ```
#[derive(Error, Debug)]
pub enum IntakeError {
    /// Topic name is not part of the bus vocabulary
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// An event handler failed while processing an event
    #[error("Handler '{handler}' failed: {reason}")]
    Handler { handler: String, reason: String },

    /// Assigning one more call would exceed the agent's capacity
    #[error("Agent {agent_id} is at capacity ({capacity})")]
    CapacityExceeded { agent_id: AgentId, capacity: u32 },

    /// Agent id is not registered
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// Call was not attributed to the agent it is being released from
    #[error("Call {call_id} is not assigned to agent {agent_id}")]
    NotAssigned { agent_id: AgentId, call_id: CallId },

    /// Agent is logged off and cannot take calls
    #[error("Agent {0} is offline")]
    AgentOffline(AgentId),

    /// Resource already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Call id is not present in the call ledger
    #[error("Unknown call: {0}")]
    UnknownCall(CallId),

    /// Call state machine violation
    #[error("Call {call_id} cannot move from {from} to {to}")]
    InvalidTransition {
        call_id: CallId,
        from: CallStatus,
        to: CallStatus,
    },

    /// Queue operation failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// Storage repository failure not covered by `Database`
    #[error("Repository error: {0}")]
    Repository(String),

    /// SQL error from the sqlite repository
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntakeError {
    /// Build a handler error from anything displayable
    pub fn handler(handler: impl Into<String>, reason: impl ToString) -> Self {
        Self::Handler {
            handler: handler.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Build a repository error
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }

    /// True for the errors the router recovers from by queuing the call
    pub fn is_assignment_failure(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. }
                | Self::UnknownAgent(_)
                | Self::NotAssigned { .. }
                | Self::AgentOffline(_)
        )
    }
}

/// Result type for call engine operations
pub type Result<T> = std::result::Result<T, IntakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_failures_are_recoverable() {
        let capacity = IntakeError::CapacityExceeded {
            agent_id: AgentId::from("alice"),
            capacity: 1,
        };
        assert!(capacity.is_assignment_failure());
        assert!(IntakeError::UnknownAgent(AgentId::from("ghost")).is_assignment_failure());
        assert!(!IntakeError::InvalidTopic("nope".into()).is_assignment_failure());
    }

    #[test]
    fn test_error_display() {
        let err = IntakeError::NotAssigned {
            agent_id: AgentId::from("bob"),
            call_id: CallId::from("call-7"),
        };
        assert_eq!(err.to_string(), "Call call-7 is not assigned to agent bob");
        assert_eq!(
            IntakeError::handler("metrics", "boom").to_string(),
            "Handler 'metrics' failed: boom"
        );
    }
}
