//! Routing under concurrent `call_incoming` publishes
//!
//! These run on a multi-threaded runtime so router handlers for different
//! calls really do race for the same agents.

mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{started_server, EventLog};
use futures::future::join_all;
use intake_call_engine::prelude::*;
use proptest::prelude::*;

async fn publish_concurrently(bus: &Arc<EventBus>, calls: usize, priority_of: impl Fn(usize) -> i32) {
    let publishes = (0..calls).map(|n| {
        let bus = Arc::clone(bus);
        let priority = priority_of(n);
        tokio::spawn(async move {
            bus.publish(EventPayload::CallIncoming {
                call_id: CallId::from(format!("call-{}", n)),
                caller_id: format!("caller-{}", n),
                priority,
            })
            .await
        })
    });
    for joined in join_all(publishes).await {
        joined.expect("publish task").expect("publish");
    }
}

fn agent_names(count: usize) -> Vec<String> {
    (0..count).map(|n| format!("agent-{:02}", n)).collect()
}

async fn assert_no_double_booking(server: &IntakeServer, calls: usize, agents: usize) -> Result<()> {
    let assigned = calls.min(agents);
    let counts = server.calls().counts();
    assert_eq!(counts.assigned, assigned);
    assert_eq!(counts.queued, calls - assigned);
    assert_eq!(server.queue().len(), calls - assigned);

    for agent in server.agents().list() {
        assert!(agent.active_call_count() <= agent.capacity);
    }
    assert_eq!(server.agents().stats().active_calls, assigned);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_arrivals_never_overbook_agents() -> Result<()> {
    let names = agent_names(5);
    let agents: Vec<(&str, u32)> = names.iter().map(|n| (n.as_str(), 1)).collect();
    let server = started_server(&agents).await?;
    let log = EventLog::routing(server.bus());

    publish_concurrently(server.bus(), 40, |n| (n % 3) as i32).await;

    assert_no_double_booking(&server, 40, 5).await?;
    assert_eq!(log.count(Topic::CallAssigned), 5);
    assert_eq!(log.count(Topic::CallQueued), 35);
    assert_eq!(server.router().stats().assigned_direct, 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_drain_the_queue_exactly_once() -> Result<()> {
    let names = agent_names(3);
    let agents: Vec<(&str, u32)> = names.iter().map(|n| (n.as_str(), 1)).collect();
    let server = started_server(&agents).await?;
    let log = EventLog::routing(server.bus());

    publish_concurrently(server.bus(), 12, |_| 1).await;
    let talking: Vec<CallId> = log.assignments().into_iter().map(|(call, _)| call).collect();
    assert_eq!(talking.len(), 3);

    let bus = Arc::clone(server.bus());
    let resolves = talking.into_iter().map(|call_id| {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move { bus.publish(EventPayload::CallResolved { call_id }).await })
    });
    for joined in join_all(resolves).await {
        joined??;
    }

    // three agents freed, three more calls taken, nobody served twice
    let mut served: Vec<CallId> = log.assignments().into_iter().map(|(call, _)| call).collect();
    assert_eq!(served.len(), 6);
    served.sort();
    served.dedup();
    assert_eq!(served.len(), 6);
    assert_eq!(server.queue().len(), 6);
    assert_eq!(server.calls().counts().resolved, 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_agent_logging_off_mid_routing_never_strands_a_call() -> Result<()> {
    for round in 0..200 {
        let server = Arc::new(started_server(&[("agent-a", 1), ("agent-b", 1)]).await?);

        let logoff = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.agent_offline(&AgentId::from("agent-a")).await })
        };
        let arrival = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.submit_call(format!("caller-{}", round), 1).await })
        };
        let logged_off = logoff.await??;
        let call_id = arrival.await??;

        let call = server.calls().get(&call_id).expect("call admitted");
        assert_eq!(call.status, CallStatus::Assigned, "round {}: call was queued", round);
        assert!(server.queue().is_empty());
        assert_eq!(server.router().stats().assignment_failures, 0);

        let agent_id = call.assigned_agent_id.expect("assigned agent");
        let agent = server.agents().get(&agent_id).expect("agent registered");
        assert_ne!(agent.status, AgentStatus::Offline);
        if agent_id == AgentId::from("agent-a") {
            assert!(!logged_off, "round {}: agent-a logged off holding a call", round);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_concurrent_routing_assigns_min_of_calls_and_agents(
        calls in 1usize..30,
        agents in 0usize..8,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let names = agent_names(agents);
            let roster: Vec<(&str, u32)> = names.iter().map(|n| (n.as_str(), 1)).collect();
            let server = started_server(&roster).await.expect("server");
            let log = EventLog::routing(server.bus());

            publish_concurrently(server.bus(), calls, |n| (n % 4) as i32).await;

            assert_no_double_booking(&server, calls, agents).await.expect("no double booking");
            assert_eq!(log.count(Topic::CallAssigned), calls.min(agents));
            assert_eq!(
                log.count(Topic::CallAssigned) + log.count(Topic::CallQueued),
                calls
            );
        });
    }
}
