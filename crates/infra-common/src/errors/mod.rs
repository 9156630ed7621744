//! Error types for infrastructure components

use thiserror::Error;

/// Errors raised by logging setup and task supervision
#[derive(Debug, Error)]
pub enum InfraError {
    /// Invalid configuration value (log level, filter directive, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The global tracing subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// A task could not be spawned or tracked
    #[error("Task error: {0}")]
    Task(String),

    /// Shutdown did not finish within its deadline
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(std::time::Duration),
}

/// Result alias for infrastructure operations
pub type Result<T> = std::result::Result<T, InfraError>;
