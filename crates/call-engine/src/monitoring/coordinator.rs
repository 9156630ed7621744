//! # System Coordinator
//!
//! Supervises component liveness and publishes aggregate metrics.
//!
//! ```text
//!             ┌──────────── timer task (every tick_interval) ────────────┐
//!             │  spawn tick ─► try_tick() ── already running? ─► tick_overrun
//!             └───────────────────────┬──────────────────────────────────┘
//!                                     ▼
//!   poll HealthProbes ─► HealthMonitor::evaluate() ─► component_alert (→ unresponsive)
//!                                     │                        │
//!                                     │              HealthProbe::recover()
//!                                     │
//!   AgentRegistry / CallQueue / CallLedger ─► MetricsSnapshot ─► metrics_snapshot
//!                                     │
//!                   queue above threshold ─► queue_overflow_alert (once per crossing)
//! ```
//!
//! Between ticks the coordinator listens on the bus: `heartbeat` events refresh
//! the sender's health record, and the router's own publications
//! (`call_assigned`, `call_queued`, `agent_became_available`) count as router
//! heartbeats. Resolved and abandoned calls feed the lifetime counters.
//!
//! Ticks never overlap. A tick that comes due while the previous one is still
//! running is skipped and logged as `tick_overrun`.
//!
//! When a probe-backed component turns unresponsive the coordinator raises
//! the alert, runs the probe's recovery hook and re-checks it right away; a
//! component that passes the re-check is healthy again within the same tick.
//! Heartbeats only count for registered components.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use intake_infra_common::TaskSupervisor;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::health::{ComponentHandle, HealthMonitor, HealthProbe, HealthRecord, HealthStatus, HealthTransition};
use super::metrics::{Anomaly, MetricsCollector, MetricsSnapshot};
use crate::agent::AgentRegistry;
use crate::calls::CallLedger;
use crate::config::{IntakeConfig, MonitoringConfig};
use crate::error::{IntakeError, Result};
use crate::events::{Event, EventBus, EventHandler, EventPayload, SubscriptionHandle, Topic};
use crate::queue::CallQueue;

/// Component name under which router liveness is tracked
pub const ROUTER_COMPONENT: &str = "call_router";

/// What one tick did
#[derive(Debug, Clone)]
pub struct TickReport {
    /// 1-based tick number
    pub tick: u64,
    pub transitions: Vec<HealthTransition>,
    pub alerts_published: usize,
    pub overflow_alert_published: bool,
    pub snapshot: MetricsSnapshot,
    pub pruned_calls: usize,
    /// Components brought back by their recovery hook
    pub recovered: Vec<String>,
}

/// Answer to "how is the system doing"
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub components: Vec<HealthRecord>,
    pub last_snapshot: Option<MetricsSnapshot>,
    pub ticks: u64,
    pub tick_overruns: u64,
    pub recoveries: u64,
}

/// Resets the running flag even if the tick is cancelled
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Health and metrics supervisor
pub struct SystemCoordinator {
    bus: Arc<EventBus>,
    agents: Arc<AgentRegistry>,
    queue: Arc<CallQueue>,
    calls: Arc<CallLedger>,
    config: MonitoringConfig,
    finished_retention: Duration,
    health: Arc<HealthMonitor>,
    metrics: MetricsCollector,
    probes: RwLock<Vec<(String, Arc<dyn HealthProbe>)>>,
    last_snapshot: RwLock<Option<MetricsSnapshot>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    tasks: Mutex<Option<Arc<TaskSupervisor>>>,
    tick_running: AtomicBool,
    overflow_alert_active: AtomicBool,
    ticks: AtomicU64,
    overruns: AtomicU64,
    recoveries: AtomicU64,
}

impl SystemCoordinator {
    pub fn new(
        config: &IntakeConfig,
        bus: Arc<EventBus>,
        agents: Arc<AgentRegistry>,
        queue: Arc<CallQueue>,
        calls: Arc<CallLedger>,
    ) -> Self {
        let monitoring = config.monitoring.clone();
        Self {
            health: Arc::new(HealthMonitor::new(
                monitoring.degraded_after(),
                monitoring.unresponsive_after(),
            )),
            config: monitoring,
            finished_retention: config.calls.finished_retention(),
            bus,
            agents,
            queue,
            calls,
            metrics: MetricsCollector::new(),
            probes: RwLock::new(Vec::new()),
            last_snapshot: RwLock::new(None),
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(None),
            tick_running: AtomicBool::new(false),
            overflow_alert_active: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
        }
    }

    /// Track a push-model component
    pub fn register_component(&self, name: &str) -> ComponentHandle {
        info!("🩺 Monitoring component {}", name);
        ComponentHandle::new(name, Arc::clone(&self.health))
    }

    /// Track a component through a probe polled on every tick
    pub fn register_probe(&self, name: &str, probe: Arc<dyn HealthProbe>) -> ComponentHandle {
        self.probes.write().push((name.to_string(), probe));
        self.register_component(name)
    }

    /// Refresh a registered component's liveness
    pub fn record_heartbeat(&self, name: &str) {
        self.health.record_heartbeat(name);
    }

    pub fn health_of(&self, name: &str) -> Option<HealthStatus> {
        self.health.status_of(name)
    }

    /// Subscribe to heartbeat and router events. Attaching twice is a no-op.
    pub fn attach(self: &Arc<Self>) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            return Ok(());
        }

        let handler = Arc::new(CoordinatorEventHandler {
            coordinator: Arc::downgrade(self),
        });
        for topic in [
            Topic::Heartbeat,
            Topic::CallAssigned,
            Topic::CallQueued,
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
        Ok(())
    }

    /// Attach and start the tick timer
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.attach()?;

        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Ok(());
        }

        let supervisor = Arc::new(TaskSupervisor::new("system-coordinator"));
        let timer_supervisor = Arc::clone(&supervisor);
        let coordinator = Arc::downgrade(self);
        let period = self.config.tick_interval();

        supervisor
            .spawn("coordinator-timer", run_timer(coordinator, timer_supervisor, period))
            .map_err(|e| IntakeError::Internal(e.to_string()))?;
        *tasks = Some(supervisor);

        info!("🩺 System coordinator started (tick every {:?})", period);
        Ok(())
    }

    /// Stop the timer and drop subscriptions
    pub async fn stop(&self) {
        let handles: Vec<_> = self.subscriptions.lock().drain(..).collect();
        for handle in &handles {
            self.bus.unsubscribe(handle);
        }

        let supervisor = self.tasks.lock().take();
        if let Some(supervisor) = supervisor {
            if let Err(e) = supervisor.shutdown().await {
                warn!("Coordinator tasks did not stop cleanly: {}", e);
            }
            info!("🛑 System coordinator stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Run one tick unless another is in progress.
    ///
    /// Returns `None` (and logs `tick_overrun`) when the previous tick has not finished.
    pub async fn try_tick(&self) -> Option<TickReport> {
        if self
            .tick_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let overruns = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(overruns, "tick_overrun: previous coordinator tick still running, skipping");
            return None;
        }
        let _guard = TickGuard(&self.tick_running);
        Some(self.run_tick().await)
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            running: self.is_running(),
            components: self.health.records(),
            last_snapshot: self.last_snapshot.read().clone(),
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_overruns: self.overruns.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }

    pub fn last_snapshot(&self) -> Option<MetricsSnapshot> {
        self.last_snapshot.read().clone()
    }

    /// Compute a snapshot without publishing it
    pub fn current_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            &self.agents.stats(),
            self.queue.len(),
            self.calls.active_count(),
            self.config.queue_overflow_threshold,
        )
    }

    async fn run_tick(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        self.poll_probes().await;

        let transitions = self.health.evaluate();
        let mut alerts_published = 0;
        let mut recovered = Vec::new();
        for transition in &transitions {
            match transition.to {
                HealthStatus::Unresponsive => {
                    error!(
                        "🚨 Component {} is unresponsive (last heartbeat {})",
                        transition.component, transition.last_heartbeat_at
                    );
                    let alert = EventPayload::ComponentAlert {
                        component: transition.component.clone(),
                        status: HealthStatus::Unresponsive,
                        last_heartbeat_at: transition.last_heartbeat_at,
                    };
                    if self.publish(alert).await {
                        alerts_published += 1;
                    }
                    if self.try_recover(&transition.component).await {
                        recovered.push(transition.component.clone());
                    }
                }
                HealthStatus::Degraded => {
                    warn!("⚠️ Component {} is degraded", transition.component)
                }
                HealthStatus::Healthy => {}
            }
        }

        let snapshot = self.current_metrics();
        for anomaly in &snapshot.anomalies {
            match anomaly {
                Anomaly::QueueOverflow { length, threshold } => {
                    warn!("📈 Queue length {} exceeds threshold {}", length, threshold)
                }
                Anomaly::NoAgentsForQueuedCalls { queued } => {
                    warn!("No available agents with {} queued calls", queued)
                }
            }
        }
        *self.last_snapshot.write() = Some(snapshot.clone());
        self.publish(EventPayload::MetricsSnapshot(snapshot.clone()))
            .await;

        let overflow_alert_published = self.check_overflow(snapshot.queue_length).await;
        let pruned_calls = self.calls.prune_finished(self.finished_retention);

        debug!(
            "Tick {} done: queue={} available={} active={}",
            tick, snapshot.queue_length, snapshot.available_agents, snapshot.active_calls
        );
        TickReport {
            tick,
            transitions,
            alerts_published,
            overflow_alert_published,
            snapshot,
            pruned_calls,
            recovered,
        }
    }

    async fn poll_probes(&self) {
        let probes: Vec<_> = self.probes.read().clone();
        let timeout = self.config.probe_timeout();

        let checks = probes.into_iter().map(|(name, probe)| async move {
            let result = tokio::time::timeout(timeout, probe.check()).await;
            (name, result)
        });
        for (name, result) in futures::future::join_all(checks).await {
            match result {
                Ok(Ok(())) => {
                    self.health.record_heartbeat(&name);
                }
                Ok(Err(e)) => debug!("Probe for {} failed: {}", name, e),
                Err(_) => debug!("Probe for {} timed out after {:?}", name, timeout),
            }
        }
    }

    /// Run the recovery hook of an unresponsive component and re-check it.
    /// Returns `true` when the component passed the re-check.
    async fn try_recover(&self, name: &str) -> bool {
        let probe = self
            .probes
            .read()
            .iter()
            .find(|(probe_name, _)| probe_name == name)
            .map(|(_, probe)| Arc::clone(probe));
        let Some(probe) = probe else {
            return false;
        };
        let timeout = self.config.probe_timeout();

        match tokio::time::timeout(timeout, probe.recover()).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => return false,
            Ok(Err(e)) => {
                error!("❌ Failed to recover component {}: {}", name, e);
                return false;
            }
            Err(_) => {
                error!("❌ Recovery of component {} timed out after {:?}", name, timeout);
                return false;
            }
        }

        match tokio::time::timeout(timeout, probe.check()).await {
            Ok(Ok(())) => {
                self.health.record_heartbeat(name);
                self.recoveries.fetch_add(1, Ordering::Relaxed);
                info!("🔧 Component {} recovered by the coordinator", name);
                true
            }
            _ => {
                warn!("Component {} still failing after recovery", name);
                false
            }
        }
    }

    /// Publish `queue_overflow_alert` on an upward crossing; re-arm once back at or below the threshold
    async fn check_overflow(&self, queue_length: usize) -> bool {
        let threshold = self.config.queue_overflow_threshold;
        if queue_length <= threshold {
            self.overflow_alert_active.store(false, Ordering::Release);
            return false;
        }
        if self.overflow_alert_active.swap(true, Ordering::AcqRel) {
            return false;
        }

        warn!(
            "🚨 Queue overflow: {} calls waiting (threshold {})",
            queue_length, threshold
        );
        self.publish(EventPayload::QueueOverflowAlert {
            queue_length,
            threshold,
        })
        .await
    }

    async fn publish(&self, payload: EventPayload) -> bool {
        match self.bus.publish(payload).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Coordinator failed to publish: {}", e);
                false
            }
        }
    }

    fn observe(&self, event: &Event) {
        match &event.payload {
            EventPayload::Heartbeat { component } => {
                self.health.record_heartbeat(component);
            }
            EventPayload::CallAssigned { .. }
            | EventPayload::CallQueued { .. }
            | EventPayload::AgentBecameAvailable { .. } => {
                self.health.record_heartbeat(ROUTER_COMPONENT);
            }
            _ => {}
        }
        self.metrics.record(&event.payload);
    }
}

async fn run_timer(
    coordinator: Weak<SystemCoordinator>,
    supervisor: Arc<TaskSupervisor>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(strong) = coordinator.upgrade() else {
            break;
        };
        supervisor.cleanup_finished();
        if let Err(e) = supervisor.spawn("coordinator-tick", async move {
            strong.try_tick().await;
        }) {
            debug!("Coordinator timer stopping: {}", e);
            break;
        }
    }
}

/// Feeds observed bus events into the coordinator
struct CoordinatorEventHandler {
    coordinator: Weak<SystemCoordinator>,
}

#[async_trait]
impl EventHandler for CoordinatorEventHandler {
    async fn handle(&self, event: Arc<Event>) -> Result<()> {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.observe(&event);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "system_coordinator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentStatus};
    use crate::events::handler_fn;
    use std::sync::atomic::AtomicUsize;

    fn coordinator(threshold: usize) -> Arc<SystemCoordinator> {
        let mut config = IntakeConfig::default();
        config.monitoring.degraded_after_ms = 100;
        config.monitoring.unresponsive_after_ms = 300;
        config.monitoring.queue_overflow_threshold = threshold;
        Arc::new(SystemCoordinator::new(
            &config,
            Arc::new(EventBus::default()),
            Arc::new(AgentRegistry::new(1)),
            Arc::new(CallQueue::new()),
            Arc::new(CallLedger::new()),
        ))
    }

    fn count_topic(coordinator: &SystemCoordinator, topic: Topic) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        coordinator
            .bus
            .subscribe(
                topic,
                handler_fn("counter", move |_event| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        hits
    }

    #[tokio::test]
    async fn test_tick_publishes_snapshot() {
        let coordinator = coordinator(10);
        coordinator
            .agents
            .register(Agent::new("alice", "Alice", 1).with_status(AgentStatus::Available))
            .unwrap();
        let snapshots = count_topic(&coordinator, Topic::MetricsSnapshot);

        let report = coordinator.try_tick().await.unwrap();
        assert_eq!(report.tick, 1);
        assert_eq!(report.snapshot.available_agents, 1);
        assert_eq!(snapshots.load(Ordering::SeqCst), 1);
        assert!(coordinator.system_status().last_snapshot.is_some());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let coordinator = coordinator(10);
        coordinator.tick_running.store(true, Ordering::SeqCst);

        assert!(coordinator.try_tick().await.is_none());
        assert_eq!(coordinator.system_status().tick_overruns, 1);

        coordinator.tick_running.store(false, Ordering::SeqCst);
        assert!(coordinator.try_tick().await.is_some());
    }

    #[tokio::test]
    async fn test_overflow_alert_once_per_crossing() {
        let coordinator = coordinator(1);
        let alerts = count_topic(&coordinator, Topic::QueueOverflowAlert);
        coordinator.queue.enqueue("c1".into(), "a", 1).unwrap();
        coordinator.queue.enqueue("c2".into(), "b", 1).unwrap();

        assert!(coordinator.try_tick().await.unwrap().overflow_alert_published);
        assert!(!coordinator.try_tick().await.unwrap().overflow_alert_published);

        coordinator.queue.dequeue_next();
        coordinator.try_tick().await.unwrap();
        coordinator.queue.enqueue("c3".into(), "c", 1).unwrap();
        assert!(coordinator.try_tick().await.unwrap().overflow_alert_published);
        assert_eq!(alerts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_events_and_router_inference() {
        let coordinator = coordinator(10);
        coordinator.attach().unwrap();
        coordinator.register_component("faq_matcher");
        coordinator.register_component(ROUTER_COMPONENT);

        tokio::time::advance(Duration::from_millis(350)).await;
        coordinator.try_tick().await.unwrap();
        assert_eq!(coordinator.health_of("faq_matcher"), Some(HealthStatus::Unresponsive));
        assert_eq!(coordinator.health_of(ROUTER_COMPONENT), Some(HealthStatus::Unresponsive));

        coordinator
            .bus
            .publish(EventPayload::Heartbeat {
                component: "faq_matcher".into(),
            })
            .await
            .unwrap();
        coordinator
            .bus
            .publish(EventPayload::AgentBecameAvailable {
                agent_id: "alice".into(),
            })
            .await
            .unwrap();

        assert_eq!(coordinator.health_of("faq_matcher"), Some(HealthStatus::Healthy));
        assert_eq!(coordinator.health_of(ROUTER_COMPONENT), Some(HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn test_heartbeat_event_from_unregistered_component_is_dropped() {
        let coordinator = coordinator(10);
        coordinator.attach().unwrap();

        coordinator
            .bus
            .publish(EventPayload::Heartbeat {
                component: "faq_matchr".into(),
            })
            .await
            .unwrap();
        assert_eq!(coordinator.health_of("faq_matchr"), None);
        assert!(coordinator.system_status().components.is_empty());
    }

    struct FailingProbe;

    #[async_trait]
    impl HealthProbe for FailingProbe {
        async fn check(&self) -> Result<()> {
            Err(IntakeError::Internal("down".into()))
        }
    }

    /// Down until its recovery hook runs
    #[derive(Default)]
    struct RestartableComponent {
        up: AtomicBool,
        restarts: AtomicUsize,
    }

    #[async_trait]
    impl HealthProbe for RestartableComponent {
        async fn check(&self) -> Result<()> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(IntakeError::Internal("stopped".into()))
            }
        }

        async fn recover(&self) -> Result<bool> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            self.up.store(true, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_component_is_recovered() {
        let coordinator = coordinator(10);
        let alerts = count_topic(&coordinator, Topic::ComponentAlert);
        let component = Arc::new(RestartableComponent::default());
        coordinator.register_probe("transcriber", component.clone());

        tokio::time::advance(Duration::from_millis(150)).await;
        let degraded = coordinator.try_tick().await.unwrap();
        assert!(degraded.recovered.is_empty());
        assert_eq!(component.restarts.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(200)).await;
        let report = coordinator.try_tick().await.unwrap();
        assert_eq!(report.alerts_published, 1);
        assert_eq!(report.recovered, vec!["transcriber".to_string()]);
        assert_eq!(component.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.health_of("transcriber"), Some(HealthStatus::Healthy));
        assert_eq!(coordinator.system_status().recoveries, 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(coordinator.try_tick().await.unwrap().transitions.is_empty());
        assert_eq!(alerts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_probe_leads_to_one_alert() {
        let coordinator = coordinator(10);
        let alerts = count_topic(&coordinator, Topic::ComponentAlert);
        coordinator.register_probe("transcriber", Arc::new(FailingProbe));

        tokio::time::advance(Duration::from_millis(350)).await;
        let report = coordinator.try_tick().await.unwrap();
        assert_eq!(report.alerts_published, 1);

        tokio::time::advance(Duration::from_millis(350)).await;
        assert_eq!(coordinator.try_tick().await.unwrap().alerts_published, 0);
        assert_eq!(alerts.load(Ordering::SeqCst), 1);
    }
}
