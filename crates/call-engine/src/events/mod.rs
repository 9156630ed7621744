//! # Event Bus
//!
//! Typed, in-process publish/subscribe used by every other component.
//!
//! - [`Topic`]: the fixed topic vocabulary plus explicitly registered custom topics
//! - [`Event`] / [`EventPayload`]: immutable event records with one payload variant per topic
//! - [`EventBus`]: fan-out delivery with per-handler tasks, timeouts and failure containment

pub mod bus;
pub mod event;
pub mod topic;

pub use bus::{
    handler_fn, BusStats, DeliveryReport, EventBus, EventHandler, FnHandler, PendingDelivery,
    SubscriptionHandle,
};
pub use event::{Event, EventPayload};
pub use topic::Topic;
