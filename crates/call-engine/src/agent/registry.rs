//! # Agent Registry
//!
//! Authoritative agent state: identity, status, capacity and the calls each
//! agent is currently handling. The registry is the only owner of [`Agent`]
//! records; the router and coordinator go through its methods, which take
//! the internal lock for the duration of a single operation only.
//!
//! ## Status Rules
//!
//! - `Available`: logged in with load below capacity, eligible for routing
//! - `Busy`: load reached capacity; returns to `Available` as soon as one call is released
//! - `Offline`: logged off, never routed to; only idle agents can log off
//!
//! ## Load Balancing
//!
//! [`AgentRegistry::find_available_agent`] picks the available agent with the
//! fewest active calls, breaking ties by agent id ascending.
//!
//! ## Persistence
//!
//! With a [`StorageRepository`] attached, agents are loaded once at startup
//! and saved after changes on a best-effort basis: save failures are logged
//! and never fail the routing operation that triggered them.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::types::{Agent, AgentId, AgentStats, AgentStatus};
use crate::calls::CallId;
use crate::database::StorageRepository;
use crate::error::{IntakeError, Result};

/// Registry of agents and their load
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<AgentId, Agent>>,
    repository: Option<Arc<dyn StorageRepository>>,
    default_capacity: u32,
}

impl AgentRegistry {
    pub fn new(default_capacity: u32) -> Self {
        Self {
            agents: RwLock::new(BTreeMap::new()),
            repository: None,
            default_capacity: default_capacity.max(1),
        }
    }

    /// Attach the repository used by [`load_from_repository`](Self::load_from_repository)
    /// and [`persist`](Self::persist)
    pub fn with_repository(mut self, repository: Arc<dyn StorageRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn default_capacity(&self) -> u32 {
        self.default_capacity
    }

    /// Add a new agent.
    ///
    /// A zero capacity is replaced by the default capacity. Active calls on the
    /// incoming record are discarded; new agents start idle.
    pub fn register(&self, mut agent: Agent) -> Result<()> {
        if agent.capacity == 0 {
            agent.capacity = self.default_capacity;
        }
        normalize_idle(&mut agent);

        let mut agents = self.agents.write();
        if agents.contains_key(&agent.id) {
            return Err(IntakeError::AlreadyExists(format!("agent {}", agent.id)));
        }
        info!(
            "👤 Registered agent {} ({}) status={} capacity={}",
            agent.id, agent.display_name, agent.status, agent.capacity
        );
        agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    /// Remove an agent, returning its last state.
    ///
    /// Calls still attributed to the agent keep their ledger entries; resolving
    /// them later logs an unknown-agent release.
    pub fn remove(&self, agent_id: &AgentId) -> Result<Agent> {
        let removed = self
            .agents
            .write()
            .remove(agent_id)
            .ok_or_else(|| IntakeError::UnknownAgent(agent_id.clone()))?;
        if !removed.active_calls.is_empty() {
            warn!(
                "Removed agent {} while it still had {} active calls",
                agent_id,
                removed.active_calls.len()
            );
        } else {
            info!("👋 Removed agent {}", agent_id);
        }
        Ok(removed)
    }

    /// Log an offline agent in. Returns `true` when the agent can now take a call.
    pub fn set_available(&self, agent_id: &AgentId) -> Result<bool> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| IntakeError::UnknownAgent(agent_id.clone()))?;

        if agent.status == AgentStatus::Offline {
            let status = if agent.active_call_count() < agent.capacity {
                AgentStatus::Available
            } else {
                AgentStatus::Busy
            };
            agent.set_status(status);
            info!("🟢 Agent {} is now {}", agent_id, status);
        }
        Ok(agent.status == AgentStatus::Available)
    }

    /// Log an agent off. Returns `false` (and changes nothing) while it still has calls.
    pub fn set_offline(&self, agent_id: &AgentId) -> Result<bool> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| IntakeError::UnknownAgent(agent_id.clone()))?;

        if !agent.active_calls.is_empty() {
            debug!(
                "Agent {} cannot go offline with {} active calls",
                agent_id,
                agent.active_calls.len()
            );
            return Ok(false);
        }
        agent.set_status(AgentStatus::Offline);
        info!("🔴 Agent {} is now offline", agent_id);
        Ok(true)
    }

    /// Least-loaded available agent, ties broken by id ascending
    pub fn find_available_agent(&self) -> Option<Agent> {
        self.agents
            .read()
            .values()
            .filter(|a| a.is_available() && a.active_call_count() < a.capacity)
            .min_by_key(|a| a.active_call_count())
            .cloned()
    }

    /// Pick the least-loaded available agent and attribute `call_id` to it
    /// under one write lock, so the choice cannot go stale before the
    /// assignment lands. `None` when no agent can take the call.
    pub fn assign_least_loaded(&self, call_id: &CallId) -> Option<(AgentId, AgentStatus)> {
        let mut agents = self.agents.write();
        let agent = agents
            .values_mut()
            .filter(|a| a.is_available() && a.active_call_count() < a.capacity)
            .min_by_key(|a| a.active_call_count())?;

        agent.active_calls.insert(call_id.clone());
        if agent.active_call_count() >= agent.capacity {
            agent.set_status(AgentStatus::Busy);
        }
        debug!(
            "Assigned call {} to least-loaded agent {} (load {}/{})",
            call_id,
            agent.id,
            agent.active_call_count(),
            agent.capacity
        );
        Some((agent.id.clone(), agent.status))
    }

    /// Attribute `call_id` to the agent, returning its resulting status
    pub fn assign(&self, agent_id: &AgentId, call_id: &CallId) -> Result<AgentStatus> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| IntakeError::UnknownAgent(agent_id.clone()))?;

        if agent.status == AgentStatus::Offline {
            return Err(IntakeError::AgentOffline(agent_id.clone()));
        }
        if agent.active_calls.contains(call_id) {
            return Ok(agent.status);
        }
        if agent.active_call_count() >= agent.capacity {
            return Err(IntakeError::CapacityExceeded {
                agent_id: agent_id.clone(),
                capacity: agent.capacity,
            });
        }

        agent.active_calls.insert(call_id.clone());
        if agent.active_call_count() >= agent.capacity {
            agent.set_status(AgentStatus::Busy);
        }
        debug!(
            "Assigned call {} to agent {} (load {}/{})",
            call_id,
            agent_id,
            agent.active_call_count(),
            agent.capacity
        );
        Ok(agent.status)
    }

    /// Detach `call_id` from the agent. Returns `true` when the agent can take another call.
    pub fn release(&self, agent_id: &AgentId, call_id: &CallId) -> Result<bool> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| IntakeError::UnknownAgent(agent_id.clone()))?;

        if !agent.active_calls.remove(call_id) {
            return Err(IntakeError::NotAssigned {
                agent_id: agent_id.clone(),
                call_id: call_id.clone(),
            });
        }

        if agent.status == AgentStatus::Busy && agent.active_call_count() < agent.capacity {
            agent.set_status(AgentStatus::Available);
        }
        debug!(
            "Released call {} from agent {} (load {}/{})",
            call_id,
            agent_id,
            agent.active_call_count(),
            agent.capacity
        );
        Ok(agent.status == AgentStatus::Available)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<Agent> {
        self.agents.read().get(agent_id).cloned()
    }

    /// All agents ordered by id
    pub fn list(&self) -> Vec<Agent> {
        self.agents.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn stats(&self) -> AgentStats {
        let agents = self.agents.read();
        let mut stats = AgentStats {
            total: agents.len(),
            ..Default::default()
        };
        for agent in agents.values() {
            match agent.status {
                AgentStatus::Available => stats.available += 1,
                AgentStatus::Busy => stats.busy += 1,
                AgentStatus::Offline => stats.offline += 1,
            }
            stats.active_calls += agent.active_calls.len();
        }
        stats
    }

    /// Replace the registry contents with the agents stored in the repository.
    ///
    /// Calls do not survive a restart, so restored agents start idle and a
    /// stored `busy` status becomes `available`.
    pub async fn load_from_repository(&self) -> Result<usize> {
        let Some(repository) = &self.repository else {
            return Ok(0);
        };

        let stored = repository.load_agents().await?;
        let mut agents = self.agents.write();
        agents.clear();
        for mut agent in stored {
            if agent.capacity == 0 {
                agent.capacity = self.default_capacity;
            }
            normalize_idle(&mut agent);
            agents.insert(agent.id.clone(), agent);
        }
        info!("📥 Loaded {} agents from storage", agents.len());
        Ok(agents.len())
    }

    /// Save the agent's current state; failures are logged only
    pub async fn persist(&self, agent_id: &AgentId) {
        let Some(repository) = &self.repository else {
            return;
        };
        let Some(agent) = self.get(agent_id) else {
            return;
        };
        if let Err(e) = repository.save_agent(&agent).await {
            warn!("Failed to persist agent {}: {}", agent_id, e);
        }
    }
}

fn normalize_idle(agent: &mut Agent) {
    agent.active_calls.clear();
    if agent.status == AgentStatus::Busy {
        agent.set_status(AgentStatus::Available);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryRepository;

    fn registry_with(agents: &[(&str, u32)]) -> AgentRegistry {
        let registry = AgentRegistry::new(1);
        for (id, capacity) in agents {
            registry
                .register(Agent::new(*id, id.to_uppercase(), *capacity).with_status(AgentStatus::Available))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_find_prefers_lowest_load_then_id() {
        let registry = registry_with(&[("carol", 3), ("alice", 3), ("bob", 3)]);
        assert_eq!(registry.find_available_agent().unwrap().id, AgentId::from("alice"));

        registry.assign(&"alice".into(), &"c1".into()).unwrap();
        assert_eq!(registry.find_available_agent().unwrap().id, AgentId::from("bob"));

        registry.assign(&"bob".into(), &"c2".into()).unwrap();
        registry.assign(&"carol".into(), &"c3".into()).unwrap();
        registry.assign(&"carol".into(), &"c4".into()).unwrap();
        assert_eq!(registry.find_available_agent().unwrap().id, AgentId::from("alice"));
    }

    #[test]
    fn test_assign_respects_capacity() {
        let registry = registry_with(&[("alice", 1)]);
        let alice = AgentId::from("alice");

        assert_eq!(registry.assign(&alice, &"c1".into()).unwrap(), AgentStatus::Busy);
        assert!(registry.find_available_agent().is_none());
        assert!(matches!(
            registry.assign(&alice, &"c2".into()),
            Err(IntakeError::CapacityExceeded { capacity: 1, .. })
        ));
    }

    #[test]
    fn test_multi_capacity_agent_stays_available_until_full() {
        let registry = registry_with(&[("alice", 2)]);
        let alice = AgentId::from("alice");

        assert_eq!(registry.assign(&alice, &"c1".into()).unwrap(), AgentStatus::Available);
        assert_eq!(registry.assign(&alice, &"c2".into()).unwrap(), AgentStatus::Busy);

        assert!(registry.release(&alice, &"c1".into()).unwrap());
        assert_eq!(registry.get(&alice).unwrap().status, AgentStatus::Available);
        assert_eq!(registry.get(&alice).unwrap().active_call_count(), 1);
    }

    #[test]
    fn test_release_errors() {
        let registry = registry_with(&[("alice", 1)]);
        assert!(matches!(
            registry.release(&"ghost".into(), &"c1".into()),
            Err(IntakeError::UnknownAgent(_))
        ));
        assert!(matches!(
            registry.release(&"alice".into(), &"c1".into()),
            Err(IntakeError::NotAssigned { .. })
        ));
    }

    #[test]
    fn test_offline_agents_are_skipped() {
        let registry = registry_with(&[("alice", 1)]);
        let alice = AgentId::from("alice");

        assert!(registry.set_offline(&alice).unwrap());
        assert!(registry.find_available_agent().is_none());
        assert!(matches!(
            registry.assign(&alice, &"c1".into()),
            Err(IntakeError::AgentOffline(_))
        ));

        assert!(registry.set_available(&alice).unwrap());
        registry.assign(&alice, &"c1".into()).unwrap();
        assert!(!registry.set_offline(&alice).unwrap());
    }

    #[test]
    fn test_assign_least_loaded_picks_and_books_in_one_step() {
        let registry = registry_with(&[("bob", 2), ("alice", 2), ("carol", 1)]);
        registry.set_offline(&"carol".into()).unwrap();

        let (first, status) = registry.assign_least_loaded(&"c1".into()).unwrap();
        assert_eq!(first, AgentId::from("alice"));
        assert_eq!(status, AgentStatus::Available);

        let (second, _) = registry.assign_least_loaded(&"c2".into()).unwrap();
        assert_eq!(second, AgentId::from("bob"));

        registry.assign_least_loaded(&"c3".into()).unwrap();
        registry.assign_least_loaded(&"c4".into()).unwrap();
        assert!(registry.assign_least_loaded(&"c5".into()).is_none());
        assert_eq!(registry.stats().active_calls, 4);
        assert_eq!(registry.get(&"carol".into()).unwrap().active_call_count(), 0);
    }

    #[test]
    fn test_logoff_racing_assignment_never_strands_a_call() {
        for round in 0..500 {
            let registry = Arc::new(registry_with(&[("agent-a", 1), ("agent-b", 1)]));
            let call_id = CallId::from(format!("call-{}", round));

            let logoff = {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.set_offline(&"agent-a".into()).unwrap())
            };
            let picked = registry.assign_least_loaded(&call_id);
            let logged_off = logoff.join().unwrap();

            let (agent_id, _) = picked.expect("an idle agent was always left");
            let agent = registry.get(&agent_id).unwrap();
            assert!(agent.active_calls.contains(&call_id));
            assert_ne!(agent.status, AgentStatus::Offline);
            if agent_id == AgentId::from("agent-a") {
                assert!(!logged_off, "agent-a went offline holding a call");
            }
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = registry_with(&[("alice", 1)]);
        assert!(matches!(
            registry.register(Agent::new("alice", "Again", 1)),
            Err(IntakeError::AlreadyExists(_))
        ));
        assert_eq!(registry.stats().total, 1);
    }

    #[tokio::test]
    async fn test_load_normalizes_busy_agents() {
        let repository = Arc::new(InMemoryRepository::new());
        let mut busy = Agent::new("bob", "Bob", 1).with_status(AgentStatus::Busy);
        busy.active_calls.insert(CallId::from("stale"));
        repository.save_agent(&busy).await.unwrap();
        repository
            .save_agent(&Agent::new("carol", "Carol", 0))
            .await
            .unwrap();

        let registry = AgentRegistry::new(2).with_repository(repository);
        assert_eq!(registry.load_from_repository().await.unwrap(), 2);

        let bob = registry.get(&"bob".into()).unwrap();
        assert_eq!(bob.status, AgentStatus::Available);
        assert_eq!(bob.active_call_count(), 0);
        assert_eq!(registry.get(&"carol".into()).unwrap().capacity, 2);
    }
}
