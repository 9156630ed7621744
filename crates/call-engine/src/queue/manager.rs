//! # Call Queue Implementation
//!
//! Priority-ordered holding area for calls no agent could take on arrival.
//!
//! Entries leave by `(priority desc, arrival asc)`. Arrival order is a
//! per-queue sequence number, never the wall clock, so a clock step cannot
//! reorder calls of equal priority. `enqueued_at` is kept for wait times,
//! statistics and restart recovery.
//!
//! ```text
//!   priority 9 ─► [seq 4] [seq 7]
//!   priority 5 ─► [seq 1] [seq 2] [seq 8]      one FIFO lane per priority
//!   priority 1 ─► [seq 3]
//! ```
//!
//! Insertion and removal are O(log n). The position reported on enqueue is
//! the sum of the lengths of the higher-priority lanes plus the place at the
//! tail of the caller's own lane, so it costs one step per distinct priority
//! level waiting, independent of queue length. A side index by call id makes
//! `remove` and `contains` independent of queue position.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calls::CallId;
use crate::error::{IntakeError, Result};

/// A call waiting for an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub call_id: CallId,
    pub caller_id: String,
    /// Higher is more urgent
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    /// Arrival order within this queue
    pub sequence: u64,
}

impl QueueEntry {
    /// Time spent waiting so far
    pub fn waited(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.enqueued_at)
    }
}

/// Where a call landed when it was queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePlacement {
    /// 1-based position; 1 means next to be served
    pub position: usize,
    pub queue_length: usize,
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub length: usize,
    pub highest_priority: Option<i32>,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
    pub enqueued_total: u64,
}

/// FIFO of one priority level, keyed by sequence
type Lane = BTreeMap<u64, QueueEntry>;

#[derive(Default)]
struct QueueState {
    lanes: BTreeMap<Reverse<i32>, Lane>,
    index: HashMap<CallId, (i32, u64)>,
    len: usize,
    next_sequence: u64,
}

impl QueueState {
    fn insert(&mut self, entry: QueueEntry) -> Result<QueuePlacement> {
        if self.index.contains_key(&entry.call_id) {
            return Err(IntakeError::Queue(format!(
                "call {} is already queued",
                entry.call_id
            )));
        }

        let priority = Reverse(entry.priority);
        let sequence = entry.sequence;
        let ahead_in_higher: usize = self.lanes.range(..priority).map(|(_, lane)| lane.len()).sum();

        let lane = self.lanes.entry(priority).or_default();
        if lane.contains_key(&sequence) {
            return Err(IntakeError::Queue(format!(
                "sequence {} is already taken at priority {}",
                sequence, entry.priority
            )));
        }
        let ahead_in_lane = match lane.last_key_value() {
            Some((last, _)) if *last > sequence => lane.range(..sequence).count(),
            _ => lane.len(),
        };

        self.index
            .insert(entry.call_id.clone(), (entry.priority, sequence));
        lane.insert(sequence, entry);
        self.len += 1;
        self.next_sequence = self.next_sequence.max(sequence + 1);

        Ok(QueuePlacement {
            position: ahead_in_higher + ahead_in_lane + 1,
            queue_length: self.len,
        })
    }

    fn take(&mut self, priority: i32, sequence: u64) -> Option<QueueEntry> {
        let key = Reverse(priority);
        let lane = self.lanes.get_mut(&key)?;
        let entry = lane.remove(&sequence)?;
        if lane.is_empty() {
            self.lanes.remove(&key);
        }
        self.index.remove(&entry.call_id);
        self.len -= 1;
        Some(entry)
    }

    fn first(&self) -> Option<&QueueEntry> {
        self.lanes.values().next().and_then(|lane| lane.values().next())
    }
}

/// Thread-safe priority queue of waiting calls
#[derive(Default)]
pub struct CallQueue {
    state: Mutex<QueueState>,
}

impl CallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a call; a call id can be queued only once
    pub fn enqueue(
        &self,
        call_id: CallId,
        caller_id: impl Into<String>,
        priority: i32,
    ) -> Result<QueuePlacement> {
        let mut state = self.state.lock();
        let entry = QueueEntry {
            call_id,
            caller_id: caller_id.into(),
            priority,
            enqueued_at: Utc::now(),
            sequence: state.next_sequence,
        };
        let call_id = entry.call_id.clone();
        let placement = state.insert(entry)?;
        debug!(
            "Queued call {} with priority {} at position {}/{}",
            call_id, priority, placement.position, placement.queue_length
        );
        Ok(placement)
    }

    /// Put a dequeued entry back with its earlier ordering key
    pub fn requeue(&self, entry: QueueEntry) -> Result<QueuePlacement> {
        debug!("Requeueing call {}", entry.call_id);
        self.state.lock().insert(entry)
    }

    /// Remove the highest-priority, longest-waiting entry
    pub fn dequeue_next(&self) -> Option<QueueEntry> {
        let mut state = self.state.lock();
        let (priority, sequence) = state.first().map(|e| (e.priority, e.sequence))?;
        state.take(priority, sequence)
    }

    /// Remove a specific call; `None` when it was not queued
    pub fn remove(&self, call_id: &CallId) -> Option<QueueEntry> {
        let mut state = self.state.lock();
        let (priority, sequence) = *state.index.get(call_id)?;
        state.take(priority, sequence)
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.state.lock().index.contains_key(call_id)
    }

    /// Entry that `dequeue_next` would return
    pub fn peek(&self) -> Option<QueueEntry> {
        self.state.lock().first().cloned()
    }

    /// 1-based position of a queued call
    pub fn position(&self, call_id: &CallId) -> Option<usize> {
        let state = self.state.lock();
        let (priority, sequence) = *state.index.get(call_id)?;
        let key = Reverse(priority);
        let ahead_in_higher: usize = state.lanes.range(..key).map(|(_, lane)| lane.len()).sum();
        let ahead_in_lane = state.lanes.get(&key)?.range(..sequence).count();
        Some(ahead_in_higher + ahead_in_lane + 1)
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in service order
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.state
            .lock()
            .lanes
            .values()
            .flat_map(|lane| lane.values().cloned())
            .collect()
    }

    /// Re-insert previously saved entries, skipping call ids already present.
    /// Returns the number of entries restored.
    pub fn restore(&self, entries: Vec<QueueEntry>) -> usize {
        let mut state = self.state.lock();
        let mut restored = 0;
        for entry in entries {
            let call_id = entry.call_id.clone();
            match state.insert(entry) {
                Ok(_) => restored += 1,
                Err(_) => debug!("Skipping duplicate queued call {} on restore", call_id),
            }
        }
        restored
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            length: state.len,
            highest_priority: state.lanes.keys().next().map(|Reverse(p)| *p),
            oldest_enqueued_at: state
                .lanes
                .values()
                .flat_map(|lane| lane.values().map(|e| e.enqueued_at))
                .min(),
            enqueued_total: state.next_sequence,
        }
    }
}
