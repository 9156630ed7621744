//! Restart recovery through the storage repositories

use std::sync::Arc;

use anyhow::Result;
use intake_call_engine::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

fn sqlite_config(dir: &TempDir) -> IntakeConfig {
    let mut config = IntakeConfig::default();
    config.database.url = Some(format!("sqlite://{}", dir.path().join("intake.db").display()));
    config
}

async fn start(config: IntakeConfig) -> Result<IntakeServer> {
    let mut server = IntakeServer::new(config).await?;
    server.start().await?;
    Ok(server)
}

#[tokio::test]
#[serial]
async fn test_sqlite_restart_restores_agents_and_queue() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let mut server = start(sqlite_config(&dir)).await?;
    server.add_agent("alice", "Alice", Some(1)).await?;
    server.add_agent("bob", "Bob", Some(2)).await?;
    server.agent_online(&AgentId::from("alice")).await?;

    let talking = server.submit_call("caller-1", 3).await?;
    let low = server.submit_call("caller-2", 1).await?;
    let high = server.submit_call("caller-3", 7).await?;
    assert_eq!(server.calls().status(&talking), Some(CallStatus::Assigned));
    assert_eq!(server.queue().len(), 2);
    server.stop().await?;
    drop(server);

    let server = start(sqlite_config(&dir)).await?;

    // agents come back idle; the restored queue is drained on start
    let alice = server.agents().get(&AgentId::from("alice")).expect("alice restored");
    assert_eq!(alice.active_call_count(), 0);
    let bob = server.agents().get(&AgentId::from("bob")).expect("bob restored");
    assert_eq!(bob.status, AgentStatus::Offline);
    assert_eq!(bob.capacity, 2);

    assert_eq!(server.calls().status(&talking), None);
    assert_eq!(server.calls().status(&high), Some(CallStatus::Assigned));
    assert_eq!(server.calls().status(&low), Some(CallStatus::Queued));
    assert_eq!(server.queue().peek().map(|e| e.call_id), Some(low));
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_sqlite_removed_agent_stays_removed() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let mut server = start(sqlite_config(&dir)).await?;
    server.add_agent("alice", "Alice", None).await?;
    server.add_agent("carol", "Carol", None).await?;
    server.remove_agent(&AgentId::from("carol")).await?;
    server.stop().await?;
    drop(server);

    let server = start(sqlite_config(&dir)).await?;
    let ids: Vec<AgentId> = server.agents().list().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![AgentId::from("alice")]);
    Ok(())
}

#[tokio::test]
async fn test_restored_queued_call_can_be_abandoned() -> Result<()> {
    let repository: Arc<dyn StorageRepository> = Arc::new(InMemoryRepository::new());

    let mut first = IntakeServerBuilder::new()
        .with_repository(Arc::clone(&repository))
        .build()
        .await?;
    first.start().await?;
    let waiting = first.submit_call("caller", 2).await?;
    first.stop().await?;
    drop(first);

    let mut second = IntakeServerBuilder::new()
        .with_repository(repository)
        .build()
        .await?;
    second.start().await?;
    assert_eq!(second.calls().status(&waiting), Some(CallStatus::Queued));

    second.abandon_call(&waiting).await?;
    assert_eq!(second.calls().status(&waiting), Some(CallStatus::Abandoned));
    assert!(second.queue().is_empty());

    second.stop().await?;
    assert!(repository_is_empty(&second).await?);
    Ok(())
}

async fn repository_is_empty(server: &IntakeServer) -> Result<bool> {
    Ok(server.repository().load_queue_state().await?.is_empty())
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected_at_build() {
    let mut config = IntakeConfig::default();
    config.monitoring.degraded_after_ms = 5_000;
    config.monitoring.unresponsive_after_ms = 1_000;

    let result = IntakeServerBuilder::new()
        .with_config(config)
        .with_repository(Arc::new(InMemoryRepository::new()))
        .build()
        .await;
    assert!(matches!(result, Err(IntakeError::Configuration(_))));
}
