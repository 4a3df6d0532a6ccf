//! Bookkeeping for N back-to-back prerolls.
//!
//! Each step requests one preroll and waits for that break's own done event,
//! raced against a timeout. Completion waits a settle delay before the step
//! counts; a timeout counts the step at once. The service owns the timers and
//! the ad queue, this type only tracks where the chain stands.

use crate::timers::TimerId;
use crate::trigger::BreakId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// Ready to request the next preroll.
    Idle,
    Waiting { break_id: BreakId, timeout: TimerId },
    /// The current break finished; the settle timer is pending.
    Settling { timer: TimerId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerollSequence {
    total: u32,
    completed: u32,
    state: SequenceState,
}

impl PrerollSequence {
    #[must_use]
    pub const fn new(total: u32) -> Self {
        Self {
            total,
            completed: 0,
            state: SequenceState::Idle,
        }
    }

    #[must_use]
    pub const fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub const fn completed(&self) -> u32 {
        self.completed
    }

    #[must_use]
    pub const fn state(&self) -> SequenceState {
        self.state
    }

    /// Fold another request into the running chain.
    pub const fn extend(&mut self, count: u32) {
        self.total = self.total.saturating_add(count);
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.completed >= self.total
    }

    /// Whether the next preroll should be requested now.
    #[must_use]
    pub const fn wants_request(&self) -> bool {
        matches!(self.state, SequenceState::Idle) && !self.is_finished()
    }

    pub const fn begin_step(&mut self, break_id: BreakId, timeout: TimerId) {
        self.state = SequenceState::Waiting { break_id, timeout };
    }

    #[must_use]
    pub const fn waiting_on(&self) -> Option<BreakId> {
        match self.state {
            SequenceState::Waiting { break_id, .. } => Some(break_id),
            _ => None,
        }
    }

    /// The awaited break reported done. Returns the timeout timer to cancel,
    /// or `None` if `break_id` is not the break this step waits for.
    pub fn complete(&mut self, break_id: BreakId, settle: TimerId) -> Option<TimerId> {
        match self.state {
            SequenceState::Waiting {
                break_id: awaited,
                timeout,
            } if awaited == break_id => {
                self.state = SequenceState::Settling { timer: settle };
                Some(timeout)
            }
            _ => None,
        }
    }

    /// The settle delay elapsed; the step counts.
    pub fn settled(&mut self) -> bool {
        if !matches!(self.state, SequenceState::Settling { .. }) {
            return false;
        }
        self.completed = self.completed.saturating_add(1);
        self.state = SequenceState::Idle;
        true
    }

    /// The step's timeout fired before its break reported done.
    pub fn time_out(&mut self, break_id: BreakId) -> bool {
        if self.waiting_on() != Some(break_id) {
            return false;
        }
        self.completed = self.completed.saturating_add(1);
        self.state = SequenceState::Idle;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timers::TimerQueue;

    fn ids() -> (TimerId, TimerId) {
        let mut timers = TimerQueue::new();
        (timers.schedule(1, ()), timers.schedule(2, ()))
    }

    #[test]
    fn completion_counts_only_after_settling() {
        let (timeout, settle) = ids();
        let mut seq = PrerollSequence::new(2);
        assert!(seq.wants_request());
        seq.begin_step(BreakId::new(7), timeout);
        assert!(!seq.wants_request());

        assert_eq!(seq.complete(BreakId::new(8), settle), None);
        assert_eq!(seq.complete(BreakId::new(7), settle), Some(timeout));
        assert_eq!(seq.completed(), 0);
        assert!(seq.settled());
        assert_eq!(seq.completed(), 1);
        assert!(seq.wants_request());
    }

    #[test]
    fn timeout_counts_the_step_immediately() {
        let (timeout, _) = ids();
        let mut seq = PrerollSequence::new(2);
        seq.begin_step(BreakId::new(1), timeout);
        assert!(!seq.time_out(BreakId::new(2)));
        assert!(seq.time_out(BreakId::new(1)));
        assert_eq!(seq.completed(), 1);
        assert!(seq.wants_request());
        assert!(!seq.settled());
    }

    #[test]
    fn extend_grows_the_running_target() {
        let (timeout, _) = ids();
        let mut seq = PrerollSequence::new(1);
        seq.begin_step(BreakId::new(1), timeout);
        seq.extend(2);
        assert!(seq.time_out(BreakId::new(1)));
        assert_eq!(seq.total(), 3);
        assert!(!seq.is_finished());
    }

    #[test]
    fn finished_sequence_requests_nothing() {
        let (timeout, _) = ids();
        let mut seq = PrerollSequence::new(1);
        seq.begin_step(BreakId::new(3), timeout);
        seq.time_out(BreakId::new(3));
        assert!(seq.is_finished());
        assert!(!seq.wants_request());
    }
}
