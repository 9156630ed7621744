//! # Component Health Tracking
//!
//! Liveness of monitored components is derived from the time since their last
//! heartbeat:
//!
//! ```text
//!   elapsed <  T1        healthy
//!   T1 <= elapsed < T2   degraded
//!   elapsed >= T2        unresponsive
//! ```
//!
//! Heartbeats arrive by push ([`ComponentHandle::heartbeat`] or a `heartbeat`
//! event) or by pull ([`HealthProbe`] polled on every coordinator tick). A
//! heartbeat puts a component straight back to healthy; there is no
//! hysteresis. Only registered components are tracked: a heartbeat for an
//! unknown name is logged and dropped.
//!
//! Elapsed time is measured with `tokio::time::Instant` so tests can drive the
//! thresholds with a paused clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Liveness classification of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unresponsive,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unresponsive => write!(f, "unresponsive"),
        }
    }
}

/// Pull-model liveness check, polled once per coordinator tick.
///
/// `Ok(())` counts as a heartbeat; an error or a timeout does not.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<()>;

    /// Try to bring the component back after it became unresponsive.
    ///
    /// Returns `Ok(true)` when a recovery action ran. The default does nothing.
    async fn recover(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Health of one component
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub component_name: String,
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: HealthStatus,
    #[serde(skip)]
    last_heartbeat: Instant,
}

/// A status change produced by a heartbeat or an evaluation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTransition {
    pub component: String,
    pub from: HealthStatus,
    pub to: HealthStatus,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// Heartbeat bookkeeping for every monitored component
pub struct HealthMonitor {
    records: DashMap<String, HealthRecord>,
    degraded_after: Duration,
    unresponsive_after: Duration,
}

impl HealthMonitor {
    pub fn new(degraded_after: Duration, unresponsive_after: Duration) -> Self {
        Self {
            records: DashMap::new(),
            degraded_after,
            unresponsive_after,
        }
    }

    /// Start tracking a component as healthy as of now. Re-registering keeps the existing record.
    pub fn register(&self, name: &str) {
        self.records
            .entry(name.to_string())
            .or_insert_with(|| HealthRecord {
                component_name: name.to_string(),
                last_heartbeat_at: Utc::now(),
                status: HealthStatus::Healthy,
                last_heartbeat: Instant::now(),
            });
    }

    /// Refresh a registered component's heartbeat.
    /// Returns the recovery transition when the component was not healthy.
    pub fn record_heartbeat(&self, name: &str) -> Option<HealthTransition> {
        let Some(mut record) = self.records.get_mut(name) else {
            warn!("Ignoring heartbeat from unregistered component '{}'", name);
            return None;
        };

        record.last_heartbeat = Instant::now();
        record.last_heartbeat_at = Utc::now();
        let previous = record.status;
        record.status = HealthStatus::Healthy;

        if previous == HealthStatus::Healthy {
            return None;
        }
        info!("💚 Component {} recovered (was {})", name, previous);
        Some(HealthTransition {
            component: name.to_string(),
            from: previous,
            to: HealthStatus::Healthy,
            last_heartbeat_at: record.last_heartbeat_at,
        })
    }

    /// Reclassify every component from elapsed time, returning the changes
    pub fn evaluate(&self) -> Vec<HealthTransition> {
        let now = Instant::now();
        let mut transitions = Vec::new();

        for mut record in self.records.iter_mut() {
            let status = self.classify(now.saturating_duration_since(record.last_heartbeat));
            if status != record.status {
                debug!(
                    "Component {} {} -> {}",
                    record.component_name, record.status, status
                );
                transitions.push(HealthTransition {
                    component: record.component_name.clone(),
                    from: record.status,
                    to: status,
                    last_heartbeat_at: record.last_heartbeat_at,
                });
                record.status = status;
            }
        }

        transitions.sort_by(|a, b| a.component.cmp(&b.component));
        transitions
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn status_of(&self, name: &str) -> Option<HealthStatus> {
        self.records.get(name).map(|r| r.status)
    }

    /// All records ordered by component name
    pub fn records(&self) -> Vec<HealthRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.clone()).collect();
        records.sort_by(|a, b| a.component_name.cmp(&b.component_name));
        records
    }

    fn classify(&self, elapsed: Duration) -> HealthStatus {
        if elapsed >= self.unresponsive_after {
            HealthStatus::Unresponsive
        } else if elapsed >= self.degraded_after {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Handle returned when a component registers with the coordinator
#[derive(Clone)]
pub struct ComponentHandle {
    name: Arc<str>,
    monitor: Arc<HealthMonitor>,
}

impl ComponentHandle {
    pub(crate) fn new(name: &str, monitor: Arc<HealthMonitor>) -> Self {
        monitor.register(name);
        Self {
            name: Arc::from(name),
            monitor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Report liveness
    pub fn heartbeat(&self) {
        self.monitor.record_heartbeat(&self.name);
    }

    pub fn status(&self) -> Option<HealthStatus> {
        self.monitor.status_of(&self.name)
    }
}
