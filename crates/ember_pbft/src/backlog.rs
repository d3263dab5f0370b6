//! Per-sender priority queues for future messages.
//!
//! Messages whose view is ahead of the current view wait here and are
//! replayed when the state machine advances. Each sender gets an ordered
//! queue; the head is the sender's highest-priority message. Priority is the
//! composite key (sequence, round, code priority) compared
//! lexicographically, smallest first. Round changes ignore the round so the
//! lowest-sequence one always surfaces first.

#[cfg(test)]
#[path = "backlog_test.rs"]
mod backlog_test;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use ember_wire::{Address, Message, MsgCode, View};
use tracing::{trace, warn};

use crate::validator_set::ValidatorSet;

/// Priority of a buffered message within a (sequence, round): preprepares
/// unblock everything else, and commits are worth more than prepares because
/// they can finish a view on their own.
fn code_priority(code: MsgCode) -> u8 {
    match code {
        MsgCode::Preprepare | MsgCode::LightPreprepare => 1,
        MsgCode::Commit => 2,
        _ => 3,
    }
}

/// Composite ordering key; lexicographic, smaller pops first. The insertion
/// counter breaks ties so equal-priority messages keep arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    sequence: u64,
    round: u64,
    code_priority: u8,
    insertion: u64,
}

impl PriorityKey {
    fn new(code: MsgCode, view: View, insertion: u64) -> Self {
        if code == MsgCode::RoundChange {
            // Round changes sort by sequence alone.
            return Self { sequence: view.sequence, round: 0, code_priority: 0, insertion };
        }
        Self {
            sequence: view.sequence,
            round: view.round,
            code_priority: code_priority(code),
            insertion,
        }
    }
}

/// What the drain callback decided about the head of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BacklogStatus {
    /// Replay now.
    Current,
    /// Still ahead of the current view; the sender's queue stalls.
    Future,
    /// Behind the current view; drop.
    Old,
}

/// The backlog: a bounded ordered queue per sender.
///
/// All mutation happens on the consensus actor, but the map is mutex-guarded
/// as a correctness belt since the engine handle may inspect it.
#[derive(Debug)]
pub(crate) struct Backlog {
    own_address: Address,
    capacity: usize,
    queues: Mutex<HashMap<Address, BTreeMap<PriorityKey, (View, Message)>>>,
    insertions: std::sync::atomic::AtomicU64,
}

impl Backlog {
    pub(crate) fn new(own_address: Address, capacity: usize) -> Self {
        Self {
            own_address,
            capacity,
            queues: Mutex::new(HashMap::new()),
            insertions: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Buffer a future message from `src`. Messages from self are dropped.
    /// When the sender's queue is full the lowest-priority entry gives way.
    pub(crate) fn store(&self, src: Address, view: View, msg: Message) {
        if src == self.own_address {
            warn!("Backlog from self");
            return;
        }
        let insertion = self.insertions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let key = PriorityKey::new(msg.code, view, insertion);
        let mut queues = self.queues.lock().expect("backlog lock poisoned");
        let queue = queues.entry(src).or_default();
        if queue.len() >= self.capacity {
            let lowest = *queue.keys().next_back().expect("non-empty queue has a last key");
            if key > lowest {
                warn!(sender = %src, "Backlog full, dropping incoming message");
                return;
            }
            queue.remove(&lowest);
            warn!(sender = %src, "Backlog full, evicting lowest-priority message");
        }
        trace!(sender = %src, code = %msg.code, %view, "Store future message");
        queue.insert(key, (view, msg));
    }

    /// Pop every message that became current, dropping the ones that became
    /// old. Queues of senders no longer in `validator_set` are discarded. A
    /// queue stalls at its first still-future message.
    pub(crate) fn drain_ready(
        &self,
        validator_set: &ValidatorSet,
        mut status: impl FnMut(MsgCode, View) -> BacklogStatus,
    ) -> Vec<(Address, Message)> {
        let mut ready = Vec::new();
        let mut queues = self.queues.lock().expect("backlog lock poisoned");
        queues.retain(|src, _| validator_set.contains(*src));
        for (src, queue) in queues.iter_mut() {
            while let Some(entry) = queue.first_entry() {
                let (view, msg) = entry.get();
                match status(msg.code, *view) {
                    BacklogStatus::Future => break,
                    BacklogStatus::Old => {
                        trace!(sender = %src, code = %msg.code, "Drop old backlog message");
                        entry.remove();
                    }
                    BacklogStatus::Current => {
                        let (_, msg) = entry.remove();
                        ready.push((*src, msg));
                    }
                }
            }
        }
        queues.retain(|_, queue| !queue.is_empty());
        ready
    }

    #[cfg(test)]
    pub(crate) fn len(&self, src: Address) -> usize {
        self.queues.lock().expect("backlog lock poisoned").get(&src).map_or(0, BTreeMap::len)
    }
}
