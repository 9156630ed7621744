//! # Call Ledger
//!
//! Concurrent record of every call the engine has seen, keyed by call id.
//! The ledger enforces the call state machine and is what makes duplicate
//! `call_incoming` deliveries harmless: [`CallLedger::admit`] only succeeds
//! once per call id. Finished calls are kept for a retention window and then
//! pruned by the coordinator.

use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Call, CallId, CallStatus};
use crate::agent::AgentId;
use crate::error::{IntakeError, Result};
use crate::queue::QueueEntry;

/// Number of calls per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCounts {
    pub incoming: usize,
    pub assigned: usize,
    pub queued: usize,
    pub resolved: usize,
    pub abandoned: usize,
}

#[derive(Default)]
pub struct CallLedger {
    calls: DashMap<CallId, Call>,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new incoming call. Returns `false` if the id is already known.
    pub fn admit(&self, call_id: &CallId, caller_id: &str, priority: i32) -> bool {
        match self.calls.entry(call_id.clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    "Call {} already known with status {}",
                    call_id,
                    existing.get().status
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(Call::new(call_id.clone(), caller_id, priority));
                true
            }
        }
    }

    /// Record a call restored into the queue after a restart. Returns `false` if already known.
    pub fn restore_queued(&self, entry: &QueueEntry) -> bool {
        match self.calls.entry(entry.call_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let mut call = Call::new(entry.call_id.clone(), entry.caller_id.clone(), entry.priority);
                call.status = CallStatus::Queued;
                call.created_at = entry.enqueued_at;
                slot.insert(call);
                true
            }
        }
    }

    pub fn get(&self, call_id: &CallId) -> Option<Call> {
        self.calls.get(call_id).map(|c| c.clone())
    }

    pub fn status(&self, call_id: &CallId) -> Option<CallStatus> {
        self.calls.get(call_id).map(|c| c.status)
    }

    /// incoming | queued → assigned
    pub fn mark_assigned(&self, call_id: &CallId, agent_id: &AgentId) -> Result<()> {
        self.transition(
            call_id,
            &[CallStatus::Incoming, CallStatus::Queued],
            CallStatus::Assigned,
            |call| call.assigned_agent_id = Some(agent_id.clone()),
        )
        .map(|_| ())
    }

    /// incoming → queued
    pub fn mark_queued(&self, call_id: &CallId) -> Result<()> {
        self.transition(call_id, &[CallStatus::Incoming], CallStatus::Queued, |_| {})
            .map(|_| ())
    }

    /// assigned → resolved, returning the updated call
    pub fn mark_resolved(&self, call_id: &CallId) -> Result<Call> {
        self.transition(call_id, &[CallStatus::Assigned], CallStatus::Resolved, |_| {})
    }

    /// queued → abandoned
    pub fn mark_abandoned(&self, call_id: &CallId) -> Result<Call> {
        self.transition(call_id, &[CallStatus::Queued], CallStatus::Abandoned, |_| {})
    }

    /// Calls currently handled by an agent
    pub fn active_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| c.status == CallStatus::Assigned)
            .count()
    }

    pub fn counts(&self) -> CallCounts {
        let mut counts = CallCounts::default();
        for call in self.calls.iter() {
            match call.status {
                CallStatus::Incoming => counts.incoming += 1,
                CallStatus::Assigned => counts.assigned += 1,
                CallStatus::Queued => counts.queued += 1,
                CallStatus::Resolved => counts.resolved += 1,
                CallStatus::Abandoned => counts.abandoned += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Forget finished calls last updated more than `retention` ago
    pub fn prune_finished(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = Utc::now().checked_sub_signed(retention);
        let before = self.calls.len();
        self.calls.retain(|_, call| {
            !call.status.is_finished() || cutoff.map_or(true, |cutoff| call.updated_at > cutoff)
        });
        let pruned = before.saturating_sub(self.calls.len());
        if pruned > 0 {
            debug!("Pruned {} finished calls from the ledger", pruned);
        }
        pruned
    }

    fn transition(
        &self,
        call_id: &CallId,
        from: &[CallStatus],
        to: CallStatus,
        update: impl FnOnce(&mut Call),
    ) -> Result<Call> {
        let mut call = self
            .calls
            .get_mut(call_id)
            .ok_or_else(|| IntakeError::UnknownCall(call_id.clone()))?;

        if !from.contains(&call.status) {
            return Err(IntakeError::InvalidTransition {
                call_id: call_id.clone(),
                from: call.status,
                to,
            });
        }

        update(&mut call);
        call.status = to;
        call.updated_at = Utc::now();
        Ok(call.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_once() {
        let ledger = CallLedger::new();
        let id = CallId::from("c1");
        assert!(ledger.admit(&id, "+15550100", 3));
        assert!(!ledger.admit(&id, "+15550100", 3));
        assert_eq!(ledger.status(&id), Some(CallStatus::Incoming));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let ledger = CallLedger::new();
        let id = CallId::from("c1");
        let agent = AgentId::from("alice");
        ledger.admit(&id, "caller", 1);

        ledger.mark_queued(&id).unwrap();
        ledger.mark_assigned(&id, &agent).unwrap();
        let resolved = ledger.mark_resolved(&id).unwrap();
        assert_eq!(resolved.assigned_agent_id, Some(agent));
        assert_eq!(resolved.status, CallStatus::Resolved);

        assert!(matches!(
            ledger.mark_abandoned(&id),
            Err(IntakeError::InvalidTransition {
                from: CallStatus::Resolved,
                to: CallStatus::Abandoned,
                ..
            })
        ));
        assert!(matches!(
            ledger.mark_queued(&"ghost".into()),
            Err(IntakeError::UnknownCall(_))
        ));
    }

    #[test]
    fn test_counts_and_pruning() {
        let ledger = CallLedger::new();
        for id in ["a", "b", "c"] {
            ledger.admit(&id.into(), "caller", 1);
        }
        ledger.mark_assigned(&"a".into(), &"alice".into()).unwrap();
        ledger.mark_queued(&"b".into()).unwrap();
        ledger.mark_queued(&"c".into()).unwrap();
        ledger.mark_abandoned(&"c".into()).unwrap();

        let counts = ledger.counts();
        assert_eq!((counts.assigned, counts.queued, counts.abandoned), (1, 1, 1));
        assert_eq!(ledger.active_count(), 1);

        assert_eq!(ledger.prune_finished(Duration::from_secs(3600)), 0);
        assert_eq!(ledger.prune_finished(Duration::ZERO), 1);
        assert_eq!(ledger.len(), 2);
    }
}
