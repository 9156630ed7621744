//! # Call Router
//!
//! The routing decision engine. For every admitted call it either assigns
//! the least-loaded available agent or queues the call, and publishes the
//! outcome on the bus.
//!
//! ## Atomicity
//!
//! A router-wide lock serializes every decision that reads availability and
//! then mutates agents, the queue or the ledger. The outcome event is
//! dispatched inside the same critical section, so no observer can see an
//! agent made busy without the matching `call_assigned` already in flight.
//! The lock is synchronous and never held across an `.await`; delivery is
//! awaited after it is released. Agent selection and booking happen in one
//! registry step ([`AgentRegistry::assign_least_loaded`]), so an agent that
//! logs off concurrently is either booked first or never chosen.
//!
//! ## Idempotence
//!
//! Calls are admitted through the [`CallLedger`]; a second `call_incoming`
//! for a known call id is ignored and reported as
//! [`RoutingOutcome::Duplicate`].
//!
//! ## Fairness
//!
//! Queued calls leave by priority, FIFO within a priority. A low-priority
//! call can wait as long as higher-priority calls keep arriving.
//!
//! ## Recovery
//!
//! As a [`HealthProbe`] the router reports unhealthy while detached from the
//! bus; the coordinator's recovery hook re-attaches it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::handler::RoutingEventHandler;
use crate::agent::{AgentId, AgentRegistry};
use crate::calls::{CallId, CallLedger, CallStatus};
use crate::error::{IntakeError, Result};
use crate::events::{EventBus, EventPayload, PendingDelivery, SubscriptionHandle, Topic};
use crate::monitoring::HealthProbe;
use crate::queue::{CallQueue, QueuePlacement};

/// Result of routing one incoming call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingOutcome {
    /// The call went straight to an agent
    Assigned { agent_id: AgentId },
    /// No agent could take the call
    Queued(QueuePlacement),
    /// The call id was already known; nothing was done
    Duplicate(CallStatus),
}

/// Lifetime routing counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    pub assigned_direct: u64,
    pub assigned_from_queue: u64,
    pub queued: u64,
    pub resolved: u64,
    pub abandoned: u64,
    pub duplicates: u64,
    pub assignment_failures: u64,
}

#[derive(Default)]
struct RouterCounters {
    assigned_direct: AtomicU64,
    assigned_from_queue: AtomicU64,
    queued: AtomicU64,
    resolved: AtomicU64,
    abandoned: AtomicU64,
    duplicates: AtomicU64,
    assignment_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Routes calls between the agent registry and the call queue
pub struct CallRouter {
    this: Weak<CallRouter>,
    bus: Arc<EventBus>,
    agents: Arc<AgentRegistry>,
    queue: Arc<CallQueue>,
    calls: Arc<CallLedger>,
    routing_lock: Mutex<()>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    counters: RouterCounters,
}

impl CallRouter {
    pub fn new(
        bus: Arc<EventBus>,
        agents: Arc<AgentRegistry>,
        queue: Arc<CallQueue>,
        calls: Arc<CallLedger>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            bus,
            agents,
            queue,
            calls,
            routing_lock: Mutex::new(()),
            subscriptions: Mutex::new(Vec::new()),
            counters: RouterCounters::default(),
        })
    }

    /// Subscribe the router to the topics it reacts to. Attaching twice is a no-op.
    pub fn attach(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            return Ok(());
        }

        let handler = Arc::new(RoutingEventHandler {
            router: self.this.clone(),
        });
        for topic in [
            Topic::CallIncoming,
            Topic::AgentBecameAvailable,
            Topic::CallResolved,
            Topic::CallAbandoned,
        ] {
            match self.bus.subscribe(topic, handler.clone()) {
                Ok(handle) => subscriptions.push(handle),
                Err(e) => {
                    for handle in subscriptions.drain(..) {
                        self.bus.unsubscribe(&handle);
                    }
                    return Err(e);
                }
            }
        }

        info!("🚦 Call router attached to the event bus");
        Ok(())
    }

    /// Remove the router's subscriptions
    pub fn detach(&self) {
        let handles: Vec<_> = self.subscriptions.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            self.bus.unsubscribe(handle);
        }
        info!("🚦 Call router detached from the event bus");
    }

    pub fn is_attached(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }

    /// Route a new call: assign it to an agent or queue it
    pub async fn handle_incoming(
        &self,
        call_id: &CallId,
        caller_id: &str,
        priority: i32,
        correlation_id: Option<&str>,
    ) -> Result<RoutingOutcome> {
        if !self.calls.admit(call_id, caller_id, priority) {
            let status = self.calls.status(call_id).unwrap_or(CallStatus::Incoming);
            debug!(
                "Ignoring duplicate call_incoming for {} (status {})",
                call_id, status
            );
            bump(&self.counters.duplicates);
            return Ok(RoutingOutcome::Duplicate(status));
        }

        let (outcome, pending) = {
            let _routing = self.routing_lock.lock();
            self.assign_or_queue(call_id, caller_id, priority, correlation_id)?
        };
        pending.wait().await;

        if let RoutingOutcome::Assigned { agent_id } = &outcome {
            self.agents.persist(agent_id).await;
        }
        Ok(outcome)
    }

    /// Hand queued calls to agents with spare capacity. Returns how many were assigned.
    pub async fn handle_agent_available(&self, correlation_id: Option<&str>) -> Result<usize> {
        let mut deliveries = Vec::new();
        let mut touched = Vec::new();

        {
            let _routing = self.routing_lock.lock();
            while let Some(next) = self.queue.peek() {
                let Some((agent_id, _)) = self.agents.assign_least_loaded(&next.call_id) else {
                    break;
                };
                let Some(entry) = self.queue.remove(&next.call_id) else {
                    error!("Queued call {} vanished while routing", next.call_id);
                    self.undo_assignment(&agent_id, &next.call_id);
                    continue;
                };

                if let Err(e) = self.calls.mark_assigned(&entry.call_id, &agent_id) {
                    bump(&self.counters.assignment_failures);
                    warn!(
                        "Dropping queued call {} that the ledger cannot assign: {}",
                        entry.call_id, e
                    );
                    self.undo_assignment(&agent_id, &entry.call_id);
                    continue;
                }

                let waited_ms = entry.waited().num_milliseconds().max(0) as u64;
                info!(
                    "📞 Assigned queued call {} to agent {} after {}ms",
                    entry.call_id, agent_id, waited_ms
                );
                bump(&self.counters.assigned_from_queue);
                deliveries.push(self.dispatch(
                    EventPayload::CallAssigned {
                        call_id: entry.call_id,
                        agent_id: agent_id.clone(),
                        caller_id: entry.caller_id,
                        from_queue: true,
                        waited_ms,
                    },
                    correlation_id,
                )?);
                touched.push(agent_id);
            }
        }

        let assigned = deliveries.len();
        futures::future::join_all(deliveries.into_iter().map(PendingDelivery::wait)).await;
        touched.sort();
        touched.dedup();
        for agent_id in &touched {
            self.agents.persist(agent_id).await;
        }
        Ok(assigned)
    }

    /// Finish an assigned call and free its agent. Returns `false` when ignored.
    pub async fn handle_resolved(
        &self,
        call_id: &CallId,
        correlation_id: Option<&str>,
    ) -> Result<bool> {
        let (agent_id, pending) = {
            let _routing = self.routing_lock.lock();
            match self.calls.status(call_id) {
                Some(CallStatus::Assigned) => {}
                status => {
                    debug!(
                        "Ignoring call_resolved for {} (status {:?})",
                        call_id, status
                    );
                    return Ok(false);
                }
            }

            let call = self.calls.mark_resolved(call_id)?;
            let agent_id = call.assigned_agent_id.ok_or_else(|| {
                IntakeError::Internal(format!("assigned call {} has no agent", call_id))
            })?;
            bump(&self.counters.resolved);

            let available = match self.agents.release(&agent_id, call_id) {
                Ok(available) => available,
                Err(e) if e.is_assignment_failure() => {
                    warn!("Resolved call {} but could not release agent: {}", call_id, e);
                    false
                }
                Err(e) => return Err(e),
            };
            info!("✅ Call {} resolved by agent {}", call_id, agent_id);

            let pending = if available {
                Some(self.dispatch(
                    EventPayload::AgentBecameAvailable {
                        agent_id: agent_id.clone(),
                    },
                    correlation_id,
                )?)
            } else {
                None
            };
            (agent_id, pending)
        };

        if let Some(pending) = pending {
            pending.wait().await;
        }
        self.agents.persist(&agent_id).await;
        Ok(true)
    }

    /// Drop a queued call whose caller hung up. Returns `false` when ignored.
    pub fn handle_abandoned(&self, call_id: &CallId) -> Result<bool> {
        let _routing = self.routing_lock.lock();
        match self.calls.status(call_id) {
            Some(CallStatus::Queued) => {
                self.queue.remove(call_id);
                self.calls.mark_abandoned(call_id)?;
                bump(&self.counters.abandoned);
                info!("📴 Queued call {} abandoned by caller", call_id);
                Ok(true)
            }
            status => {
                debug!(
                    "Ignoring call_abandoned for {} (status {:?})",
                    call_id, status
                );
                Ok(false)
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            assigned_direct: c.assigned_direct.load(Ordering::Relaxed),
            assigned_from_queue: c.assigned_from_queue.load(Ordering::Relaxed),
            queued: c.queued.load(Ordering::Relaxed),
            resolved: c.resolved.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            assignment_failures: c.assignment_failures.load(Ordering::Relaxed),
        }
    }

    /// Runs with the routing lock held
    fn assign_or_queue(
        &self,
        call_id: &CallId,
        caller_id: &str,
        priority: i32,
        correlation_id: Option<&str>,
    ) -> Result<(RoutingOutcome, PendingDelivery)> {
        if let Some((agent_id, _)) = self.agents.assign_least_loaded(call_id) {
            if let Err(e) = self.calls.mark_assigned(call_id, &agent_id) {
                bump(&self.counters.assignment_failures);
                self.undo_assignment(&agent_id, call_id);
                return Err(e);
            }

            info!(
                "📞 Assigned call {} (priority {}) to agent {}",
                call_id, priority, agent_id
            );
            bump(&self.counters.assigned_direct);
            let pending = self.dispatch(
                EventPayload::CallAssigned {
                    call_id: call_id.clone(),
                    agent_id: agent_id.clone(),
                    caller_id: caller_id.to_string(),
                    from_queue: false,
                    waited_ms: 0,
                },
                correlation_id,
            )?;
            return Ok((RoutingOutcome::Assigned { agent_id }, pending));
        }

        let placement = self.queue.enqueue(call_id.clone(), caller_id, priority)?;
        self.calls.mark_queued(call_id)?;
        info!(
            "📋 Queued call {} (priority {}) at position {}/{}",
            call_id, priority, placement.position, placement.queue_length
        );
        bump(&self.counters.queued);

        let pending = self.dispatch(
            EventPayload::CallQueued {
                call_id: call_id.clone(),
                priority,
                position: placement.position,
                queue_length: placement.queue_length,
            },
            correlation_id,
        )?;
        Ok((RoutingOutcome::Queued(placement), pending))
    }

    fn undo_assignment(&self, agent_id: &AgentId, call_id: &CallId) {
        if let Err(e) = self.agents.release(agent_id, call_id) {
            error!("Failed to undo assignment of {}: {}", call_id, e);
        }
    }

    fn dispatch(
        &self,
        payload: EventPayload,
        correlation_id: Option<&str>,
    ) -> Result<PendingDelivery> {
        match correlation_id {
            Some(id) => self.bus.dispatch_correlated(payload, id),
            None => self.bus.dispatch(payload),
        }
    }
}

#[async_trait]
impl HealthProbe for CallRouter {
    async fn check(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(IntakeError::Internal(
                "call router is not attached to the bus".to_string(),
            ))
        }
    }

    async fn recover(&self) -> Result<bool> {
        if self.is_attached() {
            return Ok(false);
        }
        self.attach()?;
        info!("🔧 Call router re-attached to the event bus");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentStatus};

    fn router_with_agents(agents: &[&str]) -> Arc<CallRouter> {
        let registry = Arc::new(AgentRegistry::new(1));
        for id in agents {
            registry
                .register(Agent::new(*id, *id, 1).with_status(AgentStatus::Available))
                .unwrap();
        }
        CallRouter::new(
            Arc::new(EventBus::default()),
            registry,
            Arc::new(CallQueue::new()),
            Arc::new(CallLedger::new()),
        )
    }

    #[tokio::test]
    async fn test_assign_then_queue() {
        let router = router_with_agents(&["alice"]);

        let first = router
            .handle_incoming(&"c1".into(), "+1", 1, None)
            .await
            .unwrap();
        assert_eq!(
            first,
            RoutingOutcome::Assigned {
                agent_id: "alice".into()
            }
        );

        let second = router
            .handle_incoming(&"c2".into(), "+2", 1, None)
            .await
            .unwrap();
        assert_eq!(
            second,
            RoutingOutcome::Queued(QueuePlacement {
                position: 1,
                queue_length: 1
            })
        );
        assert_eq!(router.calls.status(&"c2".into()), Some(CallStatus::Queued));
    }

    #[tokio::test]
    async fn test_duplicate_is_ignored() {
        let router = router_with_agents(&["alice", "bob"]);
        router
            .handle_incoming(&"c1".into(), "+1", 1, None)
            .await
            .unwrap();
        let again = router
            .handle_incoming(&"c1".into(), "+1", 1, None)
            .await
            .unwrap();

        assert_eq!(again, RoutingOutcome::Duplicate(CallStatus::Assigned));
        assert_eq!(router.agents.stats().active_calls, 1);
        assert_eq!(router.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_resolve_frees_agent_and_drains_queue() {
        let router = router_with_agents(&["alice"]);
        router.attach().unwrap();

        router
            .handle_incoming(&"c1".into(), "+1", 1, None)
            .await
            .unwrap();
        router
            .handle_incoming(&"c2".into(), "+2", 1, None)
            .await
            .unwrap();
        assert_eq!(router.queue.len(), 1);

        assert!(router.handle_resolved(&"c1".into(), None).await.unwrap());
        assert_eq!(router.queue.len(), 0);
        assert_eq!(router.calls.status(&"c2".into()), Some(CallStatus::Assigned));
        assert_eq!(router.stats().assigned_from_queue, 1);

        // resolving twice is ignored
        assert!(!router.handle_resolved(&"c1".into(), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_abandon_only_applies_to_queued_calls() {
        let router = router_with_agents(&["alice"]);
        router
            .handle_incoming(&"c1".into(), "+1", 1, None)
            .await
            .unwrap();
        router
            .handle_incoming(&"c2".into(), "+2", 1, None)
            .await
            .unwrap();

        assert!(!router.handle_abandoned(&"c1".into()).unwrap());
        assert!(router.handle_abandoned(&"c2".into()).unwrap());
        assert!(router.queue.is_empty());
        assert_eq!(router.calls.status(&"c2".into()), Some(CallStatus::Abandoned));
    }

    #[tokio::test]
    async fn test_logged_off_agent_is_passed_over_for_an_idle_one() {
        let router = router_with_agents(&["alice", "bob"]);
        router.agents.set_offline(&"alice".into()).unwrap();

        let outcome = router
            .handle_incoming(&"c1".into(), "+1", 1, None)
            .await
            .unwrap();
        assert_eq!(outcome, RoutingOutcome::Assigned { agent_id: "bob".into() });
        assert!(router.queue.is_empty());
        assert_eq!(router.stats().assignment_failures, 0);
    }

    #[tokio::test]
    async fn test_recover_reattaches_a_detached_router() {
        let router = router_with_agents(&["alice"]);
        assert!(router.recover().await.unwrap());
        assert!(!router.recover().await.unwrap());

        router.detach();
        assert!(router.check().await.is_err());
        assert!(router.recover().await.unwrap());
        assert!(router.check().await.is_ok());

        router
            .bus
            .publish(EventPayload::CallIncoming {
                call_id: "c1".into(),
                caller_id: "+1".into(),
                priority: 1,
            })
            .await
            .unwrap();
        assert_eq!(router.calls.status(&"c1".into()), Some(CallStatus::Assigned));
    }

    #[tokio::test]
    async fn test_probe_reflects_attachment() {
        let router = router_with_agents(&[]);
        assert!(router.check().await.is_err());
        router.attach().unwrap();
        router.attach().unwrap();
        assert!(router.check().await.is_ok());
        assert_eq!(router.bus.subscriber_count(&Topic::CallIncoming), 1);
        router.detach();
        assert!(!router.is_attached());
    }
}
