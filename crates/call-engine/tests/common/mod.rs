//! Shared fixtures for the intake integration tests

#![allow(dead_code)]

use std::sync::Arc;

use intake_call_engine::prelude::*;
use parking_lot::Mutex;

/// Build and start a server over an in-memory repository.
///
/// Every `(id, capacity)` pair is registered and logged in.
pub async fn started_server(agents: &[(&str, u32)]) -> anyhow::Result<IntakeServer> {
    let server = offline_server(agents).await?;
    for (id, _) in agents {
        server.agent_online(&AgentId::from(*id)).await?;
    }
    Ok(server)
}

/// Like [`started_server`] but every agent stays offline
pub async fn offline_server(agents: &[(&str, u32)]) -> anyhow::Result<IntakeServer> {
    let mut server = IntakeServerBuilder::new()
        .with_repository(Arc::new(InMemoryRepository::new()))
        .build()
        .await?;
    server.start().await?;
    for (id, capacity) in agents {
        server.add_agent(*id, format!("Agent {}", id), Some(*capacity)).await?;
    }
    Ok(server)
}

/// Records every payload published on the subscribed topics
#[derive(Clone, Default)]
pub struct EventLog {
    payloads: Arc<Mutex<Vec<EventPayload>>>,
}

impl EventLog {
    pub fn attach(bus: &EventBus, topics: &[Topic]) -> Self {
        let log = Self::default();
        for topic in topics {
            let sink = Arc::clone(&log.payloads);
            bus.subscribe(
                topic.clone(),
                handler_fn("event_log", move |event| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().push(event.payload.clone());
                        Ok(())
                    }
                }),
            )
            .expect("subscribe event log");
        }
        log
    }

    /// Log routing outcomes: `call_assigned` and `call_queued`
    pub fn routing(bus: &EventBus) -> Self {
        Self::attach(bus, &[Topic::CallAssigned, Topic::CallQueued])
    }

    pub fn payloads(&self) -> Vec<EventPayload> {
        self.payloads.lock().clone()
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.payloads
            .lock()
            .iter()
            .filter(|p| p.topic() == topic)
            .count()
    }

    /// `(call, agent)` pairs in the order they were assigned
    pub fn assignments(&self) -> Vec<(CallId, AgentId)> {
        self.payloads
            .lock()
            .iter()
            .filter_map(|p| match p {
                EventPayload::CallAssigned {
                    call_id, agent_id, ..
                } => Some((call_id.clone(), agent_id.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn queued(&self) -> Vec<CallId> {
        self.payloads
            .lock()
            .iter()
            .filter_map(|p| match p {
                EventPayload::CallQueued { call_id, .. } => Some(call_id.clone()),
                _ => None,
            })
            .collect()
    }
}
