//! # In-process Event Bus
//!
//! Fan-out publish/subscribe over the fixed topic vocabulary.
//!
//! ```text
//!  publisher ──dispatch(payload)──► EventBus ──snapshot subscribers of topic
//!                                     │
//!                     ┌───────────────┼───────────────┐
//!                     ▼               ▼               ▼
//!                tokio task      tokio task      tokio task
//!              (timeout+catch) (timeout+catch) (timeout+catch)
//!                     │               │               │
//!                     └──────► PendingDelivery::wait() ──► DeliveryReport
//! ```
//!
//! Every handler runs on its own task, bounded by the configured handler
//! timeout. A handler that errors, panics or times out is logged and counted;
//! it never affects the other handlers and never reaches the publisher. The bus
//! does not retry.
//!
//! Subscriptions are kept in an arena indexed by topic. Dispatch snapshots the
//! subscriber list under a read lock, so every handler subscribed before the
//! call receives the event and handlers subscribed afterwards do not.
//!
//! `dispatch` and `publish` must be called from within a Tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::event::{Event, EventPayload};
use super::topic::{Topic, TopicVocabulary};
use crate::config::EventBusConfig;
use crate::error::{IntakeError, Result};

/// Receives events for the topics it is subscribed to
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event. Errors are logged by the bus and go no further.
    async fn handle(&self, event: Arc<Event>) -> Result<()>;

    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Handler backed by a closure, see [`handler_fn`]
pub struct FnHandler<F, Fut> {
    name: String,
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F, Fut>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: Arc<Event>) -> Result<()> {
        (self.func)(event).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapt an async closure into a subscribable handler
///
/// ```rust,no_run
/// use intake_call_engine::events::{handler_fn, EventBus, Topic};
///
/// # fn example(bus: &EventBus) -> intake_call_engine::Result<()> {
/// bus.subscribe(
///     Topic::CallQueued,
///     handler_fn("queue-logger", |event| async move {
///         println!("queued: {:?}", event.payload);
///         Ok(())
///     }),
/// )?;
/// # Ok(())
/// # }
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        func,
        _future: PhantomData,
    })
}

/// Identifies one subscription; pass it back to [`EventBus::unsubscribe`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

struct Subscriber {
    id: u64,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct SubscriptionArena {
    vocabulary: TopicVocabulary,
    by_topic: HashMap<Topic, Vec<Subscriber>>,
    topic_of: HashMap<u64, Topic>,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

/// Lifetime bus counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub subscriptions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryOutcome {
    Delivered,
    Failed,
    TimedOut,
}

/// Per-event delivery summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub event_id: Uuid,
    pub topic: Topic,
    pub delivered: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl DeliveryReport {
    /// Number of handlers the event was fanned out to
    pub fn subscribers(&self) -> usize {
        self.delivered + self.failed + self.timed_out
    }
}

/// Delivery that has started but may not have finished.
///
/// Dropping it detaches the handler tasks; they still run to completion.
pub struct PendingDelivery {
    event: Arc<Event>,
    tasks: Vec<JoinHandle<DeliveryOutcome>>,
}

impl PendingDelivery {
    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    pub fn handler_count(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every handler to finish, fail or time out
    pub async fn wait(self) -> DeliveryReport {
        let mut report = DeliveryReport {
            event_id: self.event.id,
            topic: self.event.topic.clone(),
            delivered: 0,
            failed: 0,
            timed_out: 0,
        };

        for outcome in futures::future::join_all(self.tasks).await {
            match outcome {
                Ok(DeliveryOutcome::Delivered) => report.delivered += 1,
                Ok(DeliveryOutcome::TimedOut) => report.timed_out += 1,
                // a JoinError means the runtime cancelled the task
                Ok(DeliveryOutcome::Failed) | Err(_) => report.failed += 1,
            }
        }
        report
    }
}

/// In-process publish/subscribe bus
pub struct EventBus {
    arena: RwLock<SubscriptionArena>,
    next_id: AtomicU64,
    counters: Arc<Counters>,
    handler_timeout: Duration,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(&EventBusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: &EventBusConfig) -> Self {
        Self::with_handler_timeout(config.handler_timeout())
    }

    pub fn with_handler_timeout(handler_timeout: Duration) -> Self {
        Self {
            arena: RwLock::new(SubscriptionArena::default()),
            next_id: AtomicU64::new(1),
            counters: Arc::new(Counters::default()),
            handler_timeout,
        }
    }

    /// Add a custom topic to the vocabulary
    pub fn register_topic(&self, name: &str) -> Result<Topic> {
        let topic = self.arena.write().vocabulary.register(name)?;
        debug!("Registered event topic '{}'", topic);
        Ok(topic)
    }

    /// Register `handler` for every future event on `topic`
    pub fn subscribe(
        &self,
        topic: Topic,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle> {
        let mut arena = self.arena.write();
        if !arena.vocabulary.is_recognized(&topic) {
            return Err(IntakeError::InvalidTopic(topic.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Subscribed handler '{}' to {} (subscription {})",
            handler.name(),
            topic,
            id
        );
        arena
            .by_topic
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, handler });
        arena.topic_of.insert(id, topic.clone());

        Ok(SubscriptionHandle { id, topic })
    }

    /// Subscribe by topic name; unknown names fail with `InvalidTopic`
    pub fn subscribe_named(
        &self,
        name: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle> {
        let topic = self.arena.read().vocabulary.resolve(name)?;
        self.subscribe(topic, handler)
    }

    /// Remove a subscription. Returns `false` when it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut arena = self.arena.write();
        let Some(topic) = arena.topic_of.remove(&handle.id) else {
            return false;
        };

        if let Some(subscribers) = arena.by_topic.get_mut(&topic) {
            subscribers.retain(|s| s.id != handle.id);
            if subscribers.is_empty() {
                arena.by_topic.remove(&topic);
            }
        }
        debug!("Unsubscribed {} from {}", handle.id, topic);
        true
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.arena
            .read()
            .by_topic
            .get(topic)
            .map_or(0, |subscribers| subscribers.len())
    }

    /// Start delivering `payload` to the current subscribers of its topic
    pub fn dispatch(&self, payload: EventPayload) -> Result<PendingDelivery> {
        self.dispatch_inner(payload, None)
    }

    /// Like [`dispatch`](Self::dispatch), tagging the event with a correlation id
    pub fn dispatch_correlated(
        &self,
        payload: EventPayload,
        correlation_id: impl Into<String>,
    ) -> Result<PendingDelivery> {
        self.dispatch_inner(payload, Some(correlation_id.into()))
    }

    /// Deliver `payload` and wait for every handler
    pub async fn publish(&self, payload: EventPayload) -> Result<DeliveryReport> {
        Ok(self.dispatch(payload)?.wait().await)
    }

    pub async fn publish_correlated(
        &self,
        payload: EventPayload,
        correlation_id: impl Into<String>,
    ) -> Result<DeliveryReport> {
        Ok(self.dispatch_correlated(payload, correlation_id)?.wait().await)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            subscriptions: self.arena.read().topic_of.len(),
        }
    }

    fn dispatch_inner(
        &self,
        payload: EventPayload,
        correlation_id: Option<String>,
    ) -> Result<PendingDelivery> {
        let topic = payload.topic();
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let arena = self.arena.read();
            if !arena.vocabulary.is_recognized(&topic) {
                return Err(IntakeError::InvalidTopic(topic.to_string()));
            }
            arena
                .by_topic
                .get(&topic)
                .map(|subscribers| subscribers.iter().map(|s| Arc::clone(&s.handler)).collect())
                .unwrap_or_default()
        };

        let event = Arc::new(Event::new(payload, correlation_id));
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Dispatching {} event {} to {} handlers",
            event.topic,
            event.id,
            handlers.len()
        );

        let tasks = handlers
            .into_iter()
            .map(|handler| {
                tokio::spawn(deliver(
                    handler,
                    Arc::clone(&event),
                    Arc::clone(&self.counters),
                    self.handler_timeout,
                ))
            })
            .collect();

        Ok(PendingDelivery { event, tasks })
    }
}

async fn deliver(
    handler: Arc<dyn EventHandler>,
    event: Arc<Event>,
    counters: Arc<Counters>,
    timeout: Duration,
) -> DeliveryOutcome {
    let guarded = AssertUnwindSafe(handler.handle(Arc::clone(&event))).catch_unwind();

    let outcome = match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(Ok(()))) => DeliveryOutcome::Delivered,
        Ok(Ok(Err(e))) => {
            warn!(
                handler = handler.name(),
                topic = %event.topic,
                event_id = %event.id,
                "⚠️ Handler failed: {}",
                e
            );
            DeliveryOutcome::Failed
        }
        Ok(Err(panic)) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(
                handler = handler.name(),
                topic = %event.topic,
                event_id = %event.id,
                "⚠️ Handler panicked: {}",
                reason
            );
            DeliveryOutcome::Failed
        }
        Err(_) => {
            warn!(
                handler = handler.name(),
                topic = %event.topic,
                event_id = %event.id,
                "⏱️ Handler abandoned after {:?}",
                timeout
            );
            DeliveryOutcome::TimedOut
        }
    };

    let counter = match outcome {
        DeliveryOutcome::Delivered => &counters.delivered,
        DeliveryOutcome::Failed => &counters.failed,
        DeliveryOutcome::TimedOut => &counters.timed_out,
    };
    counter.fetch_add(1, Ordering::Relaxed);
    outcome
}
