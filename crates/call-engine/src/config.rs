//! # Intake Configuration
//!
//! Configuration for every component of the intake engine. All sections carry
//! `#[serde(default)]`, so a file only needs the values it wants to change:
//!
//! ```toml
//! [agents]
//! default_capacity = 2
//!
//! [monitoring]
//! degraded_after_ms = 15000
//! unresponsive_after_ms = 45000
//! queue_overflow_threshold = 25
//! ```
//!
//! Durations are stored as integer milliseconds (or seconds where noted) and
//! exposed as [`Duration`] through accessor methods.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IntakeError, Result};

/// Top-level configuration for the intake engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Agent capacity defaults
    pub agents: AgentConfig,

    /// Health thresholds, tick interval and anomaly thresholds
    pub monitoring: MonitoringConfig,

    /// Event bus delivery settings
    pub events: EventBusConfig,

    /// Call ledger retention
    pub calls: CallLedgerConfig,

    /// Storage repository selection
    pub database: DatabaseConfig,
}

/// Agent defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Concurrent calls an agent takes unless registered with its own capacity
    pub default_capacity: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_capacity: 1,
        }
    }
}

/// Coordinator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Silence after which a component is degraded (T1)
    pub degraded_after_ms: u64,

    /// Silence after which a component is unresponsive (T2)
    pub unresponsive_after_ms: u64,

    /// Interval between coordinator ticks
    pub tick_interval_ms: u64,

    /// Upper bound for a single health probe
    pub probe_timeout_ms: u64,

    /// Queue length above which a queue overflow alert is raised
    pub queue_overflow_threshold: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            degraded_after_ms: 30_000,
            unresponsive_after_ms: 90_000,
            tick_interval_ms: 10_000,
            probe_timeout_ms: 2_000,
            queue_overflow_threshold: 10,
        }
    }
}

impl MonitoringConfig {
    pub fn degraded_after(&self) -> Duration {
        Duration::from_millis(self.degraded_after_ms)
    }

    pub fn unresponsive_after(&self) -> Duration {
        Duration::from_millis(self.unresponsive_after_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// A handler still running after this long is abandoned
    pub handler_timeout_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 5_000,
        }
    }
}

impl EventBusConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

/// Call ledger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallLedgerConfig {
    /// How long resolved and abandoned calls are remembered for duplicate detection
    pub finished_retention_secs: u64,
}

impl Default for CallLedgerConfig {
    fn default() -> Self {
        Self {
            finished_retention_secs: 3_600,
        }
    }
}

impl CallLedgerConfig {
    pub fn finished_retention(&self) -> Duration {
        Duration::from_secs(self.finished_retention_secs)
    }
}

/// Storage repository selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `None` keeps everything in memory; `sqlite:` URLs select the sqlite repository
    pub url: Option<String>,
}

impl IntakeConfig {
    /// Load a configuration file, choosing the format from its extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            IntakeError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents)
                .map_err(|e| IntakeError::configuration(format!("invalid TOML: {}", e)))?,
            Some("json") => serde_json::from_str(&contents)
                .map_err(|e| IntakeError::configuration(format!("invalid JSON: {}", e)))?,
            other => {
                return Err(IntakeError::configuration(format!(
                    "unsupported configuration format: {:?}",
                    other.unwrap_or("<none>")
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.agents.default_capacity == 0 {
            return Err(IntakeError::configuration(
                "agents.default_capacity must be greater than 0",
            ));
        }

        let monitoring = &self.monitoring;
        if monitoring.degraded_after_ms == 0 {
            return Err(IntakeError::configuration(
                "monitoring.degraded_after_ms must be greater than 0",
            ));
        }
        if monitoring.unresponsive_after_ms <= monitoring.degraded_after_ms {
            return Err(IntakeError::configuration(format!(
                "monitoring.unresponsive_after_ms ({}) must exceed degraded_after_ms ({})",
                monitoring.unresponsive_after_ms, monitoring.degraded_after_ms
            )));
        }
        if monitoring.tick_interval_ms == 0 {
            return Err(IntakeError::configuration(
                "monitoring.tick_interval_ms must be greater than 0",
            ));
        }
        if monitoring.probe_timeout_ms == 0 {
            return Err(IntakeError::configuration(
                "monitoring.probe_timeout_ms must be greater than 0",
            ));
        }

        if self.events.handler_timeout_ms == 0 {
            return Err(IntakeError::configuration(
                "events.handler_timeout_ms must be greater than 0",
            ));
        }

        if let Some(url) = &self.database.url {
            if !url.starts_with("sqlite:") {
                return Err(IntakeError::configuration(format!(
                    "database.url must be a sqlite: URL, got {}",
                    url
                )));
            }
        }

        Ok(())
    }
}
