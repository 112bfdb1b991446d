// Gremlin Deferred Callbacks
// Monotonic deadline queue dispatched on the engine thread

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use super::context::{ActivationContext, ContextId};
use crate::profile::ActionId;

/// Identifies the activation instance a timer belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub action: ActionId,
    pub context: ContextId,
}

/// A timer that came due
#[derive(Debug, Clone, PartialEq)]
pub struct DueTimer {
    pub key: TimerKey,
    /// Context generation at scheduling time
    pub generation: u64,
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    seq: u64,
    generation: u64,
    deadline: Instant,
}

/// At most one pending timer per key.
///
/// Scheduling a key again replaces its pending timer. Replaced entries stay
/// in the heap and are skipped when they surface.
#[derive(Debug, Default)]
pub struct Scheduler {
    next_seq: u64,
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    by_seq: HashMap<u64, TimerKey>,
    pending: HashMap<TimerKey, Pending>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, action: &ActionId, context: ActivationContext, deadline: Instant) {
        let key = TimerKey {
            action: action.clone(),
            context: context.id,
        };
        self.next_seq += 1;
        let seq = self.next_seq;
        if let Some(old) = self.pending.insert(
            key.clone(),
            Pending {
                seq,
                generation: context.generation,
                deadline,
            },
        ) {
            self.by_seq.remove(&old.seq);
        }
        self.by_seq.insert(seq, key);
        self.heap.push(Reverse((deadline, seq)));
    }

    pub fn cancel(&mut self, action: &ActionId, context: ContextId) -> bool {
        let key = TimerKey {
            action: action.clone(),
            context,
        };
        match self.pending.remove(&key) {
            Some(old) => {
                self.by_seq.remove(&old.seq);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, action: &ActionId, context: ContextId) -> bool {
        self.pending.contains_key(&TimerKey {
            action: action.clone(),
            context,
        })
    }

    /// Earliest live deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return the earliest timer due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<DueTimer> {
        while let Some(Reverse((deadline, seq))) = self.heap.peek().copied() {
            if deadline > now {
                return None;
            }
            self.heap.pop();
            let Some(key) = self.by_seq.remove(&seq) else {
                continue;
            };
            if let Some(pending) = self.pending.remove(&key) {
                return Some(DueTimer {
                    key,
                    generation: pending.generation,
                    deadline,
                });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.by_seq.clear();
        self.pending.clear();
    }
}
