//! # SQLite Storage Repository
//!
//! `sqlx`-backed repository. The schema is created on connect:
//!
//! - `agents`: one row per agent (status stored as `AVAILABLE` / `BUSY` / `OFFLINE`)
//! - `queued_calls`: the queue as saved at the last shutdown
//!
//! In-memory URLs (`sqlite::memory:`) use a single pooled connection that is
//! never recycled, since every new connection would see an empty database.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::StorageRepository;
use crate::agent::{Agent, AgentId, AgentStatus};
use crate::calls::CallId;
use crate::error::{IntakeError, Result};
use crate::queue::QueueEntry;

const CREATE_AGENTS: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        agent_id     TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        status       TEXT NOT NULL,
        capacity     INTEGER NOT NULL,
        status_since TEXT NOT NULL,
        updated_at   TEXT NOT NULL
    )";

const CREATE_QUEUED_CALLS: &str = "
    CREATE TABLE IF NOT EXISTS queued_calls (
        call_id     TEXT PRIMARY KEY,
        caller_id   TEXT NOT NULL,
        priority    INTEGER NOT NULL,
        enqueued_at TEXT NOT NULL,
        sequence    INTEGER NOT NULL
    )";

#[derive(sqlx::FromRow)]
struct AgentRow {
    agent_id: String,
    display_name: String,
    status: String,
    capacity: i64,
    status_since: DateTime<Utc>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = IntakeError;

    fn try_from(row: AgentRow) -> Result<Self> {
        let status = AgentStatus::from_str(&row.status).map_err(IntakeError::repository)?;
        let capacity = u32::try_from(row.capacity).map_err(|_| {
            IntakeError::repository(format!(
                "agent {} has invalid capacity {}",
                row.agent_id, row.capacity
            ))
        })?;

        let mut agent = Agent::new(AgentId(row.agent_id), row.display_name, capacity);
        agent.status = status;
        agent.status_since = row.status_since;
        Ok(agent)
    }
}

#[derive(sqlx::FromRow)]
struct QueuedCallRow {
    call_id: String,
    caller_id: String,
    priority: i64,
    enqueued_at: DateTime<Utc>,
    sequence: i64,
}

impl From<QueuedCallRow> for QueueEntry {
    fn from(row: QueuedCallRow) -> Self {
        QueueEntry {
            call_id: CallId(row.call_id),
            caller_id: row.caller_id,
            priority: row.priority.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            enqueued_at: row.enqueued_at,
            sequence: row.sequence.max(0) as u64,
        }
    }
}

/// Repository stored in an SQLite database
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Connect to `url` (e.g. `sqlite://intake.db` or `sqlite::memory:`) and create the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let repository = Self { pool };
        repository.create_schema().await?;

        info!("💾 Connected to sqlite repository at {}", url);
        Ok(repository)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(CREATE_AGENTS).execute(&self.pool).await?;
        sqlx::query(CREATE_QUEUED_CALLS).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageRepository for SqliteRepository {
    async fn load_agents(&self) -> Result<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT agent_id, display_name, status, capacity, status_since
             FROM agents
             ORDER BY agent_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Agent::try_from).collect()
    }

    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            "INSERT INTO agents (agent_id, display_name, status, capacity, status_since, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(agent_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 status = excluded.status,
                 capacity = excluded.capacity,
                 status_since = excluded.status_since,
                 updated_at = excluded.updated_at",
        )
        .bind(&agent.id.0)
        .bind(&agent.display_name)
        .bind(agent.status.as_db_str())
        .bind(i64::from(agent.capacity))
        .bind(agent.status_since)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!("Saved agent {} ({})", agent.id, agent.status);
        Ok(())
    }

    async fn delete_agent(&self, agent_id: &AgentId) -> Result<()> {
        sqlx::query("DELETE FROM agents WHERE agent_id = ?1")
            .bind(&agent_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_queue_state(&self) -> Result<Vec<QueueEntry>> {
        let rows: Vec<QueuedCallRow> = sqlx::query_as(
            "SELECT call_id, caller_id, priority, enqueued_at, sequence
             FROM queued_calls
             ORDER BY priority DESC, enqueued_at ASC, sequence ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(QueueEntry::from).collect())
    }

    async fn save_queue_state(&self, entries: &[QueueEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM queued_calls")
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO queued_calls (call_id, caller_id, priority, enqueued_at, sequence)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&entry.call_id.0)
            .bind(&entry.caller_id)
            .bind(i64::from(entry.priority))
            .bind(entry.enqueued_at)
            .bind(i64::try_from(entry.sequence).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Saved {} queued calls", entries.len());
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_agent_round_trip() {
        let repository = SqliteRepository::connect("sqlite::memory:").await.unwrap();

        let alice = Agent::new("alice", "Alice", 2).with_status(AgentStatus::Available);
        repository.save_agent(&alice).await.unwrap();
        repository
            .save_agent(&alice.clone().with_status(AgentStatus::Offline))
            .await
            .unwrap();
        repository.save_agent(&Agent::new("bob", "Bob", 1)).await.unwrap();

        let agents = repository.load_agents().await.unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].id, AgentId::from("alice"));
        assert_eq!(agents[0].status, AgentStatus::Offline);
        assert_eq!(agents[0].capacity, 2);

        repository.delete_agent(&"bob".into()).await.unwrap();
        assert_eq!(repository.load_agents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_state_is_replaced() {
        let repository = SqliteRepository::connect("sqlite::memory:").await.unwrap();
        let entry = |id: &str, priority: i32, sequence: u64| QueueEntry {
            call_id: CallId::from(id),
            caller_id: format!("caller-{}", id),
            priority,
            enqueued_at: Utc::now(),
            sequence,
        };

        repository
            .save_queue_state(&[entry("old", 1, 0)])
            .await
            .unwrap();
        repository
            .save_queue_state(&[entry("low", 1, 1), entry("high", 9, 2)])
            .await
            .unwrap();

        let restored = repository.load_queue_state().await.unwrap();
        let ids: Vec<_> = restored.iter().map(|e| e.call_id.to_string()).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }
}
