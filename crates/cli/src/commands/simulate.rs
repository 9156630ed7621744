//! Simulate command - Drive the full intake pipeline with synthetic traffic
//!
//! Agents are registered and logged in, callers arrive with random priorities,
//! and every `call_assigned` starts a simulated conversation that publishes
//! `call_resolved` after a randomized handling time. The run ends once every
//! call is resolved (or the deadline passes) and the final metrics snapshot is
//! printed as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use intake_call_engine::prelude::*;
use intake_infra_common::TaskSupervisor;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

/// Knobs of one simulation run
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub agents: usize,
    pub calls: usize,
    pub capacity: Option<u32>,
    pub handle_ms: u64,
    pub config: Option<PathBuf>,
}

/// Execute simulate command
pub async fn execute(options: SimulationOptions) -> Result<()> {
    let config = match &options.config {
        Some(path) => IntakeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => IntakeConfig::default(),
    };

    let mut server = IntakeServerBuilder::new()
        .with_config(config)
        .build()
        .await
        .context("building intake server")?;
    server.start().await?;

    for n in 1..=options.agents {
        let agent_id = format!("agent-{:03}", n);
        server
            .add_agent(agent_id.as_str(), format!("Agent {}", n), options.capacity)
            .await?;
        server.agent_online(&AgentId::from(agent_id)).await?;
    }

    let conversations = Arc::new(TaskSupervisor::new("simulated-agents"));
    server.bus().subscribe(
        Topic::CallAssigned,
        conversation_handler(Arc::clone(server.bus()), Arc::clone(&conversations), options.handle_ms),
    )?;

    info!(
        "🎬 Simulating {} calls against {} agents (~{}ms per call)",
        options.calls, options.agents, options.handle_ms
    );
    let mut rng = SmallRng::from_entropy();
    for n in 1..=options.calls {
        let priority = rng.gen_range(1..=9);
        server.submit_call(format!("+1555{:07}", n), priority).await?;
        tokio::time::sleep(Duration::from_millis(rng.gen_range(0..=10))).await;
    }

    let deadline = drain_deadline(&options);
    let finished = tokio::time::timeout(deadline, wait_for_resolution(&server, options.calls)).await;
    if finished.is_err() {
        warn!(
            "⏰ Simulation deadline of {:?} passed with {} calls still queued",
            deadline,
            server.queue().len()
        );
    }

    let snapshot = server.coordinator().current_metrics();
    let stats = server.stats();

    if let Err(e) = conversations.shutdown().await {
        warn!("Simulated conversations did not stop cleanly: {}", e);
    }
    server.stop().await?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    info!(
        "📊 Routed {} direct, {} from queue, {} resolved",
        stats.router.assigned_direct, stats.router.assigned_from_queue, stats.router.resolved
    );
    Ok(())
}

/// Each assignment starts a conversation that resolves the call later
fn conversation_handler(
    bus: Arc<EventBus>,
    conversations: Arc<TaskSupervisor>,
    handle_ms: u64,
) -> Arc<dyn EventHandler> {
    handler_fn("simulated_agent", move |event| {
        let bus = Arc::clone(&bus);
        let conversations = Arc::clone(&conversations);
        async move {
            let EventPayload::CallAssigned {
                call_id, agent_id, ..
            } = &event.payload
            else {
                return Ok(());
            };

            let talk_time = handling_time(handle_ms);
            let call_id = call_id.clone();
            let agent_id = agent_id.clone();
            conversations
                .spawn(format!("conversation-{}", call_id), async move {
                    tokio::time::sleep(talk_time).await;
                    info!("☎️ Agent {} finished call {}", agent_id, call_id);
                    if let Err(e) = bus.publish(EventPayload::CallResolved { call_id }).await {
                        warn!("Failed to resolve simulated call: {}", e);
                    }
                })
                .map_err(|e| IntakeError::Internal(e.to_string()))?;
            Ok(())
        }
    })
}

/// Uniform between half and one and a half times the mean
fn handling_time(mean_ms: u64) -> Duration {
    let spread = mean_ms / 2;
    let ms = SmallRng::from_entropy().gen_range(mean_ms - spread..=mean_ms + spread);
    Duration::from_millis(ms)
}

/// Enough time for every call to be handled twice over, plus slack
fn drain_deadline(options: &SimulationOptions) -> Duration {
    let seats = (options.agents as u64) * u64::from(options.capacity.unwrap_or(1)).max(1);
    let rounds = (options.calls as u64).div_ceil(seats.max(1));
    Duration::from_millis(rounds * options.handle_ms * 3) + Duration::from_secs(5)
}

async fn wait_for_resolution(server: &IntakeServer, calls: usize) {
    let mut poll = tokio::time::interval(Duration::from_millis(50));
    loop {
        poll.tick().await;
        if server.calls().counts().resolved >= calls {
            return;
        }
    }
}
