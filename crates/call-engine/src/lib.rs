//! # Call Intake Engine
//!
//! Event-driven orchestration for the intake side of a call center. Incoming
//! calls are assigned to available human agents or held in a priority queue,
//! and a coordinator keeps watch over the health of every participating
//! component.
//!
//! ## Features
//!
//! - **Event Bus**: Typed topic publish/subscribe with isolated, time-limited handlers
//! - **Agent Registry**: Availability tracking with capacity and least-loaded selection
//! - **Call Queue**: Priority ordering with FIFO among equal priorities
//! - **Call Router**: Assign-or-queue decisions and queue draining, exactly once per call
//! - **System Coordinator**: Heartbeat-based health, metrics snapshots and overflow alerts
//! - **Persistence**: Agents and queued calls survive restarts through SQLite
//!
//! ## Architecture
//!
//! - [`events`]: Topics, event payloads and the bus
//! - [`agent`]: Agent records and the registry
//! - [`queue`]: The priority call queue
//! - [`calls`]: Per-call lifecycle ledger
//! - [`routing`]: The call router and its bus subscription
//! - [`monitoring`]: Health tracking, metrics and the coordinator
//! - [`database`]: Storage repositories
//! - [`server`]: Wiring and lifecycle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use intake_call_engine::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut server = IntakeServerBuilder::new()
//!         .with_config(IntakeConfig::default())
//!         .build()
//!         .await?;
//!     server.start().await?;
//!
//!     server.add_agent("alice", "Alice", None).await?;
//!     server.agent_online(&AgentId::from("alice")).await?;
//!     server.submit_call("+15550100", 5).await?;
//!
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;
pub mod config;

// Intake functionality modules
pub mod events;
pub mod agent;
pub mod queue;
pub mod calls;
pub mod routing;
pub mod monitoring;

// Database integration
pub mod database;

pub mod server;

// Re-exports for convenience
pub use config::IntakeConfig;
pub use error::{IntakeError, Result};
pub use server::{IntakeServer, IntakeServerBuilder, ServerStats, SYSTEM_START_TOPIC, SYSTEM_STOP_TOPIC};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        IntakeConfig, IntakeError, IntakeServer, IntakeServerBuilder, Result, ServerStats,
        SYSTEM_START_TOPIC, SYSTEM_STOP_TOPIC,
    };

    pub use crate::config::{
        AgentConfig, CallLedgerConfig, DatabaseConfig, EventBusConfig, MonitoringConfig,
    };

    pub use crate::events::{
        handler_fn, DeliveryReport, Event, EventBus, EventHandler, EventPayload, SubscriptionHandle,
        Topic,
    };

    pub use crate::agent::{Agent, AgentId, AgentRegistry, AgentStats, AgentStatus};

    pub use crate::queue::{CallQueue, QueueEntry, QueuePlacement, QueueStats};

    pub use crate::calls::{Call, CallId, CallLedger, CallStatus};

    pub use crate::routing::{CallRouter, RoutingOutcome};

    pub use crate::monitoring::{
        Anomaly, ComponentHandle, HealthProbe, HealthStatus, MetricsSnapshot, SystemCoordinator,
        SystemStatus,
    };

    pub use crate::database::{InMemoryRepository, SqliteRepository, StorageRepository};

    pub use chrono::{DateTime, Utc};
}
