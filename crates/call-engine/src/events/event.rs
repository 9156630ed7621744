//! Event records and their typed payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::topic::Topic;
use crate::agent::AgentId;
use crate::calls::CallId;
use crate::monitoring::{HealthStatus, MetricsSnapshot};

/// Payload of an event, one variant per topic.
///
/// The topic of an [`Event`] is always derived from its payload, so a payload
/// cannot travel under the wrong topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A caller reached the intake pipeline
    CallIncoming {
        call_id: CallId,
        caller_id: String,
        priority: i32,
    },

    /// A call was handed to an agent, either on arrival or from the queue
    CallAssigned {
        call_id: CallId,
        agent_id: AgentId,
        caller_id: String,
        from_queue: bool,
        waited_ms: u64,
    },

    /// No agent could take the call; it is waiting in the queue
    CallQueued {
        call_id: CallId,
        priority: i32,
        /// 1-based position at insertion
        position: usize,
        queue_length: usize,
    },

    /// An agent regained capacity
    AgentBecameAvailable { agent_id: AgentId },

    /// The agent finished the call
    CallResolved { call_id: CallId },

    /// The caller hung up before reaching an agent
    CallAbandoned { call_id: CallId },

    MetricsSnapshot(MetricsSnapshot),

    /// A monitored component crossed into `status`
    ComponentAlert {
        component: String,
        status: HealthStatus,
        last_heartbeat_at: DateTime<Utc>,
    },

    QueueOverflowAlert {
        queue_length: usize,
        threshold: usize,
    },

    /// Liveness signal pushed by a component
    Heartbeat { component: String },

    /// Payload for an explicitly registered topic
    Custom {
        topic: Topic,
        data: serde_json::Value,
    },
}

impl EventPayload {
    /// Topic this payload is published under
    pub fn topic(&self) -> Topic {
        match self {
            EventPayload::CallIncoming { .. } => Topic::CallIncoming,
            EventPayload::CallAssigned { .. } => Topic::CallAssigned,
            EventPayload::CallQueued { .. } => Topic::CallQueued,
            EventPayload::AgentBecameAvailable { .. } => Topic::AgentBecameAvailable,
            EventPayload::CallResolved { .. } => Topic::CallResolved,
            EventPayload::CallAbandoned { .. } => Topic::CallAbandoned,
            EventPayload::MetricsSnapshot(_) => Topic::MetricsSnapshot,
            EventPayload::ComponentAlert { .. } => Topic::ComponentAlert,
            EventPayload::QueueOverflowAlert { .. } => Topic::QueueOverflowAlert,
            EventPayload::Heartbeat { .. } => Topic::Heartbeat,
            EventPayload::Custom { topic, .. } => topic.clone(),
        }
    }

    /// Call the payload refers to, if any
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            EventPayload::CallIncoming { call_id, .. }
            | EventPayload::CallAssigned { call_id, .. }
            | EventPayload::CallQueued { call_id, .. }
            | EventPayload::CallResolved { call_id }
            | EventPayload::CallAbandoned { call_id } => Some(call_id),
            _ => None,
        }
    }
}

/// Immutable record delivered to subscribers.
///
/// Created by the bus at publish time; handlers receive it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub topic: Topic,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    /// Ties together events caused by the same request
    pub correlation_id: Option<String>,
}

impl Event {
    pub(crate) fn new(payload: EventPayload, correlation_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: payload.topic(),
            payload,
            timestamp: Utc::now(),
            correlation_id,
        }
    }
}
