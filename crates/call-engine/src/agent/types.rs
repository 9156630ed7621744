//! Core types for agent management

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calls::CallId;

/// Agent identifier type for strongly-typed agent references
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        AgentId(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        AgentId(s.to_string())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Agent status enumeration
///
/// Only `Available` agents are eligible for routing. `Busy` means the agent is
/// at capacity; an agent below capacity with some calls stays `Available`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Agent can take another call
    Available,

    /// Agent is at capacity
    Busy,

    /// Agent is logged off
    Offline,
}

impl AgentStatus {
    /// Database representation
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AgentStatus::Available => "AVAILABLE",
            AgentStatus::Busy => "BUSY",
            AgentStatus::Offline => "OFFLINE",
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "available" | "Available" | "AVAILABLE" => Ok(AgentStatus::Available),
            "busy" | "Busy" | "BUSY" => Ok(AgentStatus::Busy),
            "offline" | "Offline" | "OFFLINE" => Ok(AgentStatus::Offline),
            _ => Err(format!("Unknown agent status: {}", s)),
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Available => write!(f, "available"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Agent information and current load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier
    pub id: AgentId,

    /// Human-readable agent name
    pub display_name: String,

    /// Current agent status
    pub status: AgentStatus,

    /// Maximum number of concurrent calls
    pub capacity: u32,

    /// Calls currently attributed to this agent
    pub active_calls: BTreeSet<CallId>,

    /// When `status` last changed
    pub status_since: DateTime<Utc>,
}

impl Agent {
    /// New offline agent with no calls
    pub fn new(id: impl Into<AgentId>, display_name: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            status: AgentStatus::Offline,
            capacity,
            active_calls: BTreeSet::new(),
            status_since: Utc::now(),
        }
    }

    /// Start in the given status
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    /// The load metric used for balancing
    pub fn active_call_count(&self) -> u32 {
        self.active_calls.len() as u32
    }

    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Available
    }

    pub(crate) fn set_status(&mut self, status: AgentStatus) {
        if self.status != status {
            self.status = status;
            self.status_since = Utc::now();
        }
    }
}

/// Agent counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub offline: usize,
    /// Sum of active calls over all agents
    pub active_calls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!("AVAILABLE".parse::<AgentStatus>().unwrap(), AgentStatus::Available);
        assert_eq!("busy".parse::<AgentStatus>().unwrap(), AgentStatus::Busy);
        assert!("on_break".parse::<AgentStatus>().is_err());

        for status in [AgentStatus::Available, AgentStatus::Busy, AgentStatus::Offline] {
            assert_eq!(status.as_db_str().parse::<AgentStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_new_agent_is_offline_and_idle() {
        let agent = Agent::new("alice", "Alice", 2);
        assert_eq!(agent.status, AgentStatus::Offline);
        assert_eq!(agent.active_call_count(), 0);
        assert_eq!(agent.id.as_ref(), "alice");
    }
}
