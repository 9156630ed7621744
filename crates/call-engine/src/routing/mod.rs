//! # Call Routing
//!
//! The routing decision engine and its event bus wiring.
//!
//! ```text
//!   call_incoming ──► CallRouter ──► find_available_agent()
//!                          │              │
//!                          │      found ──┴── none
//!                          │        │          │
//!                          │   assign+publish  enqueue+publish
//!                          │   call_assigned   call_queued
//!                          │
//!   agent_became_available ─► dequeue_next() ─► assign+publish call_assigned
//!   call_resolved ──────────► release agent ──► publish agent_became_available
//!   call_abandoned ─────────► remove from queue
//! ```
//!
//! Agents are chosen by lowest active call count, ties broken by agent id.

pub mod handler;
pub mod router;

pub use handler::RoutingEventHandler;
pub use router::{CallRouter, RouterStats, RoutingOutcome};
