//! # Call Queue
//!
//! Holds calls that arrived while no agent had capacity. The queue only
//! orders and stores entries; the router decides when calls go in and come
//! out, and publishes the matching events.

pub mod manager;

pub use manager::{CallQueue, QueueEntry, QueuePlacement, QueueStats};
