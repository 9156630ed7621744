//! # Intake Server
//!
//! Wires the intake components together and manages their lifecycle. An
//! [`IntakeServer`] is constructed once at process start, started, and stopped
//! on shutdown; every component is explicitly owned by it and shared by
//! reference, with no global instances.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              IntakeServer               │
//! ├─────────────────────────────────────────┤
//! │  submit_call │ resolve_call │ agents... │   adapter helpers
//! ├─────────────────────────────────────────┤
//! │                EventBus                 │
//! ├──────────────────┬──────────────────────┤
//! │    CallRouter    │  SystemCoordinator   │
//! ├──────────────────┴──────────────────────┤
//! │ AgentRegistry │ CallQueue │ CallLedger  │
//! ├─────────────────────────────────────────┤
//! │           StorageRepository             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! - `build`: validates configuration, opens the repository, loads agents and
//!   restores the queue saved by the previous run
//! - `start`: attaches the router and coordinator to the bus, starts the tick
//!   timer, announces `system_start` and drains any restored queue
//! - `stop`: announces `system_stop`, detaches, stops the timer and saves the queue
//!
//! `system_start` and `system_stop` are custom topics registered at build
//! time; both carry the timestamp and the number of registered agents.
//!
//! ## Example
//!
//! ```rust,no_run
//! use intake_call_engine::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let mut server = IntakeServerBuilder::new()
//!     .with_config(IntakeConfig::default())
//!     .build()
//!     .await?;
//! server.start().await?;
//!
//! server.add_agent("alice", "Alice", None).await?;
//! server.agent_online(&AgentId::from("alice")).await?;
//!
//! let call_id = server.submit_call("+15550100", 5).await?;
//! println!("📞 call {} is {:?}", call_id, server.calls().status(&call_id));
//!
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::agent::{Agent, AgentId, AgentRegistry, AgentStats};
use crate::calls::{CallCounts, CallId, CallLedger};
use crate::config::IntakeConfig;
use crate::database::{open_repository, StorageRepository};
use crate::error::Result;
use crate::events::{BusStats, DeliveryReport, EventBus, EventPayload, Topic};
use crate::monitoring::{ComponentHandle, SystemCoordinator, SystemStatus, ROUTER_COMPONENT};
use crate::queue::{CallQueue, QueueStats};
use crate::routing::{CallRouter, RouterStats};

/// Custom topic announced once the server has started
pub const SYSTEM_START_TOPIC: &str = "system_start";
/// Custom topic announced when the server begins shutting down
pub const SYSTEM_STOP_TOPIC: &str = "system_stop";

/// Combined statistics of every component
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub agents: AgentStats,
    pub queue: QueueStats,
    pub calls: CallCounts,
    pub router: RouterStats,
    pub bus: BusStats,
}

/// A complete intake engine with its lifecycle
pub struct IntakeServer {
    config: IntakeConfig,
    bus: Arc<EventBus>,
    agents: Arc<AgentRegistry>,
    queue: Arc<CallQueue>,
    calls: Arc<CallLedger>,
    router: Arc<CallRouter>,
    coordinator: Arc<SystemCoordinator>,
    repository: Arc<dyn StorageRepository>,
    running: bool,
}

impl IntakeServer {
    /// Build a server from `config`, opening the repository it names
    pub async fn new(config: IntakeConfig) -> Result<Self> {
        IntakeServerBuilder::new().with_config(config).build().await
    }

    async fn assemble(config: IntakeConfig, repository: Arc<dyn StorageRepository>) -> Result<Self> {
        let bus = Arc::new(EventBus::new(&config.events));
        bus.register_topic(SYSTEM_START_TOPIC)?;
        bus.register_topic(SYSTEM_STOP_TOPIC)?;
        let agents = Arc::new(
            AgentRegistry::new(config.agents.default_capacity).with_repository(Arc::clone(&repository)),
        );
        let queue = Arc::new(CallQueue::new());
        let calls = Arc::new(CallLedger::new());

        agents.load_from_repository().await?;

        let saved_queue = repository.load_queue_state().await?;
        for entry in &saved_queue {
            calls.restore_queued(entry);
        }
        let restored = queue.restore(saved_queue);
        if restored > 0 {
            info!("📥 Restored {} queued calls from {}", restored, repository.name());
        }

        let router = CallRouter::new(
            Arc::clone(&bus),
            Arc::clone(&agents),
            Arc::clone(&queue),
            Arc::clone(&calls),
        );
        let coordinator = Arc::new(SystemCoordinator::new(
            &config,
            Arc::clone(&bus),
            Arc::clone(&agents),
            Arc::clone(&queue),
            Arc::clone(&calls),
        ));
        coordinator.register_probe(ROUTER_COMPONENT, router.clone());

        info!(
            "✅ Intake server built with {} agents ({} repository)",
            agents.len(),
            repository.name()
        );
        Ok(Self {
            config,
            bus,
            agents,
            queue,
            calls,
            router,
            coordinator,
            repository,
            running: false,
        })
    }

    /// Attach routing and monitoring to the bus and start the tick timer
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        self.router.attach()?;
        self.coordinator.start()?;
        self.running = true;
        info!("🚀 Intake server started");
        self.announce(SYSTEM_START_TOPIC).await;

        if !self.queue.is_empty() {
            let assigned = self.router.handle_agent_available(None).await?;
            info!("📋 Assigned {} restored queued calls on startup", assigned);
        }
        Ok(())
    }

    /// Detach, stop the timer and save the queue for the next run
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        info!("🛑 Stopping intake server...");
        self.announce(SYSTEM_STOP_TOPIC).await;

        self.router.detach();
        self.coordinator.stop().await;
        self.running = false;

        let entries = self.queue.snapshot();
        self.repository.save_queue_state(&entries).await?;
        info!("✅ Intake server stopped ({} queued calls saved)", entries.len());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Publish a lifecycle event; failures are logged only
    async fn announce(&self, name: &str) {
        let payload = EventPayload::Custom {
            topic: Topic::from_name(name),
            data: serde_json::json!({
                "timestamp": Utc::now(),
                "agents": self.agents.len(),
            }),
        };
        if let Err(e) = self.bus.publish_correlated(payload, name).await {
            warn!("Failed to announce {}: {}", name, e);
        }
    }

    /// Publish `call_incoming` for a new call and return its id
    pub async fn submit_call(&self, caller_id: impl Into<String>, priority: i32) -> Result<CallId> {
        let call_id = CallId::new();
        self.publish_incoming(call_id.clone(), caller_id, priority)
            .await?;
        Ok(call_id)
    }

    /// Publish `call_incoming` for a caller-chosen call id
    pub async fn publish_incoming(
        &self,
        call_id: CallId,
        caller_id: impl Into<String>,
        priority: i32,
    ) -> Result<DeliveryReport> {
        let correlation_id = call_id.to_string();
        self.bus
            .publish_correlated(
                EventPayload::CallIncoming {
                    call_id,
                    caller_id: caller_id.into(),
                    priority,
                },
                correlation_id,
            )
            .await
    }

    /// Publish `call_resolved`
    pub async fn resolve_call(&self, call_id: &CallId) -> Result<DeliveryReport> {
        self.bus
            .publish_correlated(
                EventPayload::CallResolved {
                    call_id: call_id.clone(),
                },
                call_id.to_string(),
            )
            .await
    }

    /// Publish `call_abandoned`
    pub async fn abandon_call(&self, call_id: &CallId) -> Result<DeliveryReport> {
        self.bus
            .publish_correlated(
                EventPayload::CallAbandoned {
                    call_id: call_id.clone(),
                },
                call_id.to_string(),
            )
            .await
    }

    /// Register an offline agent; `None` capacity uses the configured default
    pub async fn add_agent(
        &self,
        agent_id: impl Into<AgentId>,
        display_name: impl Into<String>,
        capacity: Option<u32>,
    ) -> Result<()> {
        let capacity = capacity.unwrap_or(self.config.agents.default_capacity);
        let agent = Agent::new(agent_id, display_name, capacity);
        let agent_id = agent.id.clone();
        self.agents.register(agent)?;
        self.agents.persist(&agent_id).await;
        Ok(())
    }

    /// Remove an agent from the registry and the repository
    pub async fn remove_agent(&self, agent_id: &AgentId) -> Result<Agent> {
        let removed = self.agents.remove(agent_id)?;
        if let Err(e) = self.repository.delete_agent(agent_id).await {
            warn!("Failed to delete agent {} from storage: {}", agent_id, e);
        }
        Ok(removed)
    }

    /// Log an agent in and let the router hand it queued calls
    pub async fn agent_online(&self, agent_id: &AgentId) -> Result<()> {
        let available = self.agents.set_available(agent_id)?;
        self.agents.persist(agent_id).await;
        if available {
            self.bus
                .publish(EventPayload::AgentBecameAvailable {
                    agent_id: agent_id.clone(),
                })
                .await?;
        }
        Ok(())
    }

    /// Log an idle agent off. Returns `false` while it still has calls.
    pub async fn agent_offline(&self, agent_id: &AgentId) -> Result<bool> {
        let changed = self.agents.set_offline(agent_id)?;
        if changed {
            self.agents.persist(agent_id).await;
        }
        Ok(changed)
    }

    /// Publish a heartbeat on behalf of `component`
    pub async fn heartbeat(&self, component: &str) -> Result<DeliveryReport> {
        self.bus
            .publish(EventPayload::Heartbeat {
                component: component.to_string(),
            })
            .await
    }

    /// Track an external component such as a transcription service
    pub fn register_component(&self, name: &str) -> ComponentHandle {
        self.coordinator.register_component(name)
    }

    /// Extend the bus vocabulary with a custom topic
    pub fn register_topic(&self, name: &str) -> Result<Topic> {
        self.bus.register_topic(name)
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            agents: self.agents.stats(),
            queue: self.queue.stats(),
            calls: self.calls.counts(),
            router: self.router.stats(),
            bus: self.bus.stats(),
        }
    }

    pub fn system_status(&self) -> SystemStatus {
        self.coordinator.system_status()
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn queue(&self) -> &Arc<CallQueue> {
        &self.queue
    }

    pub fn calls(&self) -> &Arc<CallLedger> {
        &self.calls
    }

    pub fn router(&self) -> &Arc<CallRouter> {
        &self.router
    }

    pub fn coordinator(&self) -> &Arc<SystemCoordinator> {
        &self.coordinator
    }

    pub fn repository(&self) -> &Arc<dyn StorageRepository> {
        &self.repository
    }
}

/// Builder for IntakeServer with fluent API
#[derive(Default)]
pub struct IntakeServerBuilder {
    config: Option<IntakeConfig>,
    repository: Option<Arc<dyn StorageRepository>>,
}

impl IntakeServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration; defaults are used otherwise
    pub fn with_config(mut self, config: IntakeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this repository instead of the one named by `database.url`
    pub fn with_repository(mut self, repository: Arc<dyn StorageRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Validate the configuration and assemble the server
    pub async fn build(self) -> Result<IntakeServer> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let repository = match self.repository {
            Some(repository) => repository,
            None => open_repository(&config.database).await?,
        };
        IntakeServer::assemble(config, repository).await
    }
}
