//! Aggregate metrics and anomaly detection

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentStats;
use crate::events::EventPayload;

/// A system-level condition worth alerting on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "anomaly", rename_all = "snake_case")]
pub enum Anomaly {
    /// More calls waiting than the configured threshold
    QueueOverflow { length: usize, threshold: usize },
    /// Calls are waiting and no agent is available to take them
    NoAgentsForQueuedCalls { queued: usize },
}

/// Point-in-time view of the intake pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queue_length: usize,
    pub available_agents: usize,
    pub busy_agents: usize,
    pub offline_agents: usize,
    /// Calls currently assigned to an agent
    pub active_calls: usize,
    pub calls_assigned_total: u64,
    pub calls_queued_total: u64,
    pub calls_resolved_total: u64,
    pub calls_abandoned_total: u64,
    pub generated_at: DateTime<Utc>,
    pub anomalies: Vec<Anomaly>,
}

/// Anomalies for the given queue length and agent availability
pub fn detect_anomalies(queue_length: usize, available_agents: usize, threshold: usize) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    if queue_length > threshold {
        anomalies.push(Anomaly::QueueOverflow {
            length: queue_length,
            threshold,
        });
    }
    if queue_length > 0 && available_agents == 0 {
        anomalies.push(Anomaly::NoAgentsForQueuedCalls {
            queued: queue_length,
        });
    }
    anomalies
}

/// Lifetime counters fed from observed bus events
#[derive(Default)]
pub struct MetricsCollector {
    assigned: AtomicU64,
    queued: AtomicU64,
    resolved: AtomicU64,
    abandoned: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an observed event; other payloads are ignored
    pub fn record(&self, payload: &EventPayload) {
        let counter = match payload {
            EventPayload::CallAssigned { .. } => &self.assigned,
            EventPayload::CallQueued { .. } => &self.queued,
            EventPayload::CallResolved { .. } => &self.resolved,
            EventPayload::CallAbandoned { .. } => &self.abandoned,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Combine live component state with the lifetime counters
    pub fn snapshot(
        &self,
        agents: &AgentStats,
        queue_length: usize,
        active_calls: usize,
        overflow_threshold: usize,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_length,
            available_agents: agents.available,
            busy_agents: agents.busy,
            offline_agents: agents.offline,
            active_calls,
            calls_assigned_total: self.assigned.load(Ordering::Relaxed),
            calls_queued_total: self.queued.load(Ordering::Relaxed),
            calls_resolved_total: self.resolved.load(Ordering::Relaxed),
            calls_abandoned_total: self.abandoned.load(Ordering::Relaxed),
            generated_at: Utc::now(),
            anomalies: detect_anomalies(queue_length, agents.available, overflow_threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::CallId;

    #[test]
    fn test_anomaly_rules() {
        assert!(detect_anomalies(0, 0, 10).is_empty());
        assert!(detect_anomalies(10, 2, 10).is_empty());
        assert_eq!(
            detect_anomalies(11, 0, 10),
            vec![
                Anomaly::QueueOverflow {
                    length: 11,
                    threshold: 10
                },
                Anomaly::NoAgentsForQueuedCalls { queued: 11 },
            ]
        );
    }

    #[test]
    fn test_counters_feed_snapshot() {
        let collector = MetricsCollector::new();
        collector.record(&EventPayload::CallResolved {
            call_id: CallId::from("c1"),
        });
        collector.record(&EventPayload::Heartbeat {
            component: "faq".into(),
        });

        let agents = AgentStats {
            total: 3,
            available: 1,
            busy: 1,
            offline: 1,
            active_calls: 1,
        };
        let snapshot = collector.snapshot(&agents, 2, 1, 10);
        assert_eq!(snapshot.calls_resolved_total, 1);
        assert_eq!(snapshot.calls_assigned_total, 0);
        assert_eq!(snapshot.busy_agents, 1);
        assert!(snapshot.anomalies.is_empty());
    }
}
