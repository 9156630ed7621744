//! # Monitoring
//!
//! Component health, aggregate metrics and the [`SystemCoordinator`] that
//! ties them together on a fixed tick.
//!
//! - [`health`]: heartbeat tracking, [`HealthProbe`] and [`ComponentHandle`]
//! - [`metrics`]: [`MetricsSnapshot`] and anomaly rules
//! - [`coordinator`]: the tick loop and alert publication

pub mod coordinator;
pub mod health;
pub mod metrics;

pub use coordinator::{SystemCoordinator, SystemStatus, TickReport, ROUTER_COMPONENT};
pub use health::{ComponentHandle, HealthMonitor, HealthProbe, HealthRecord, HealthStatus, HealthTransition};
pub use metrics::{detect_anomalies, Anomaly, MetricsCollector, MetricsSnapshot};
