//! # Agent Management
//!
//! Agent identity, status and load tracking.
//!
//! - [`types`]: `AgentId`, `AgentStatus`, `Agent`, `AgentStats`
//! - [`registry`]: the concurrent [`AgentRegistry`] used by routing and monitoring

pub mod registry;
pub mod types;

pub use registry::AgentRegistry;
pub use types::{Agent, AgentId, AgentStats, AgentStatus};
