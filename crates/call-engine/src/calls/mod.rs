//! # Calls
//!
//! Call identity, the call state machine and the [`CallLedger`] that records
//! every call admitted into the intake pipeline.

pub mod ledger;
pub mod types;

pub use ledger::{CallCounts, CallLedger};
pub use types::{Call, CallId, CallStatus};
