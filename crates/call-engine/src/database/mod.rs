//! # Storage Repository
//!
//! The engine keeps all live state in memory and reads/writes durable state
//! through [`StorageRepository`]:
//!
//! - agents are loaded once at startup and saved after status changes
//! - the queue is saved on shutdown and restored on the next startup
//!
//! Two implementations ship with the engine: [`InMemoryRepository`] for tests
//! and ephemeral deployments, and [`SqliteRepository`] backed by `sqlx`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{Agent, AgentId};
use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::queue::QueueEntry;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

/// Durable storage consumed by the engine
#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// Every stored agent
    async fn load_agents(&self) -> Result<Vec<Agent>>;

    /// Insert or update one agent
    async fn save_agent(&self, agent: &Agent) -> Result<()>;

    /// Delete an agent; deleting an unknown agent is not an error
    async fn delete_agent(&self, agent_id: &AgentId) -> Result<()>;

    /// Queue entries saved by the last `save_queue_state`, in service order
    async fn load_queue_state(&self) -> Result<Vec<QueueEntry>>;

    /// Replace the stored queue with `entries`
    async fn save_queue_state(&self, entries: &[QueueEntry]) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Open the repository selected by `config`: in memory without a URL, sqlite otherwise
pub async fn open_repository(config: &DatabaseConfig) -> Result<Arc<dyn StorageRepository>> {
    match &config.url {
        None => Ok(Arc::new(InMemoryRepository::new())),
        Some(url) => Ok(Arc::new(SqliteRepository::connect(url).await?)),
    }
}
