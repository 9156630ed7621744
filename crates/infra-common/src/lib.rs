//! # Intake Infrastructure Common
//!
//! Shared infrastructure for the intake call-routing stack:
//!
//! - [`logging`]: `tracing-subscriber` setup with env-filter and optional JSON output
//! - [`tasks`]: tracked background tasks with cancellation and bounded shutdown
//! - [`errors`]: the error type shared by both
//!
//! ```rust,no_run
//! use intake_infra_common::logging::{setup_logging, LoggingConfig};
//! use tracing::Level;
//!
//! setup_logging(LoggingConfig::new(Level::INFO, "intake")).ok();
//! ```

pub mod errors;
pub mod logging;
pub mod tasks;

pub use errors::{InfraError, Result};
pub use logging::{setup_logging, LoggingConfig};
pub use tasks::{TaskStats, TaskSupervisor};
