//! Virtual-time task queue.
//!
//! Every deferred continuation of the engine is an entry here instead of a
//! nested host timer. The host only has to wake the service at
//! [`TimerQueue::next_deadline`]; cancelling is a map removal, and teardown is
//! a single [`TimerQueue::clear`].

use std::collections::{BTreeMap, HashMap};

/// Handle for a scheduled entry. Ids are never reused within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
pub struct TimerQueue<T> {
    next_id: u64,
    entries: BTreeMap<(u64, TimerId), T>,
    deadlines: HashMap<TimerId, u64>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to become due at `deadline_ms`. Entries sharing a
    /// deadline run in scheduling order.
    pub fn schedule(&mut self, deadline_ms: u64, task: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert((deadline_ms, id), task);
        self.deadlines.insert(id, deadline_ms);
        id
    }

    /// Remove a pending entry, returning its task if it had not run yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let deadline = self.deadlines.remove(&id)?;
        self.entries.remove(&(deadline, id))
    }

    /// Pop the earliest entry whose deadline is at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<(TimerId, T)> {
        let (&(deadline, id), _) = self.entries.first_key_value()?;
        if deadline > now_ms {
            return None;
        }
        self.deadlines.remove(&id);
        self.entries.remove(&(deadline, id)).map(|task| (id, task))
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.keys().next().map(|&(deadline, _)| deadline)
    }

    #[must_use]
    pub fn contains(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> {
        self.entries.iter().map(|(&(deadline, _), task)| (deadline, task))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.deadlines.clear();
    }
}
