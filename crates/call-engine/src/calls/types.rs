//! Call identity and lifecycle types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentId;

/// Call identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    /// Fresh random call id
    pub fn new() -> Self {
        CallId(Uuid::new_v4().to_string())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        CallId(s)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        CallId(s.to_string())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CallId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Call lifecycle state
///
/// ```text
/// incoming ──► assigned ──► resolved
///     │           ▲
///     └──► queued ┴──► abandoned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Incoming,
    Assigned,
    Queued,
    Resolved,
    Abandoned,
}

impl CallStatus {
    /// Terminal states
    pub fn is_finished(&self) -> bool {
        matches!(self, CallStatus::Resolved | CallStatus::Abandoned)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallStatus::Incoming => "incoming",
            CallStatus::Assigned => "assigned",
            CallStatus::Queued => "queued",
            CallStatus::Resolved => "resolved",
            CallStatus::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// One caller interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub call_id: CallId,
    pub caller_id: String,
    pub priority: i32,
    pub status: CallStatus,
    /// Set while the call is assigned and kept once it is resolved
    pub assigned_agent_id: Option<AgentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Call {
    pub fn new(call_id: CallId, caller_id: impl Into<String>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            call_id,
            caller_id: caller_id.into(),
            priority,
            status: CallStatus::Incoming,
            assigned_agent_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
