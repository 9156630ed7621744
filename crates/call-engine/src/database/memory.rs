//! In-memory storage repository

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::StorageRepository;
use crate::agent::{Agent, AgentId};
use crate::error::Result;
use crate::queue::QueueEntry;

/// Repository that lives as long as the process
#[derive(Default)]
pub struct InMemoryRepository {
    agents: Mutex<BTreeMap<AgentId, Agent>>,
    queue: Mutex<Vec<QueueEntry>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-populated with agents
    pub fn with_agents(agents: impl IntoIterator<Item = Agent>) -> Self {
        let repository = Self::new();
        repository
            .agents
            .lock()
            .extend(agents.into_iter().map(|a| (a.id.clone(), a)));
        repository
    }
}

#[async_trait]
impl StorageRepository for InMemoryRepository {
    async fn load_agents(&self) -> Result<Vec<Agent>> {
        Ok(self.agents.lock().values().cloned().collect())
    }

    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        self.agents.lock().insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn delete_agent(&self, agent_id: &AgentId) -> Result<()> {
        self.agents.lock().remove(agent_id);
        Ok(())
    }

    async fn load_queue_state(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.queue.lock().clone())
    }

    async fn save_queue_state(&self, entries: &[QueueEntry]) -> Result<()> {
        *self.queue.lock() = entries.to_vec();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
