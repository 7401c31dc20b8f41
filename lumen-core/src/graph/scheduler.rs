//! Job Queue
//!
//! The queue holds effects that were notified while the scheduler was not
//! allowed to run them right away, and tracks which phase the scheduler is
//! in.
//!
//! # States
//!
//! ```text
//!            begin_batch            end_batch (outermost)
//!   Idle ---------------> Batching ----------------------> Idle (+ flush)
//!    |
//!    | begin_flush                       end_flush
//!    +-----------> Flushing ------------------------------> Idle
//! ```
//!
//! A batch opened while flushing only bumps the depth counter; the running
//! flush picks up whatever the batch enqueued.
//!
//! # Rounds
//!
//! Flushing drains the queue in rounds. Each round takes a snapshot of the
//! pending set and clears it, so effects enqueued while the round runs land
//! in the next round instead of extending the current one. The number of
//! rounds, not recursion depth, bounds a cyclic update.

use indexmap::IndexSet;

use crate::reactive::EffectId;

/// Phase the scheduler is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Batching,
    Flushing,
}

/// Deduplicating, insertion-ordered set of pending effects plus the
/// scheduler flags.
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: IndexSet<EffectId>,
    batch_depth: u32,
    is_flushing: bool,
    flush_pending: bool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SchedulerState {
        if self.is_flushing {
            SchedulerState::Flushing
        } else if self.batch_depth > 0 {
            SchedulerState::Batching
        } else {
            SchedulerState::Idle
        }
    }

    /// Add an effect. Returns `false` if it was already pending.
    pub fn enqueue(&mut self, effect: EffectId) -> bool {
        self.pending.insert(effect)
    }

    /// Whether a newly enqueued job should ask for a deferred flush.
    ///
    /// True at most once per quiescent period: the flag stays set until a
    /// flush starts.
    pub fn request_flush(&mut self) -> bool {
        if self.is_flushing || self.batch_depth > 0 || self.flush_pending {
            return false;
        }
        self.flush_pending = true;
        true
    }

    pub fn flush_pending(&self) -> bool {
        self.flush_pending
    }

    /// Enter a batch. Returns `true` for the outermost one.
    pub fn begin_batch(&mut self) -> bool {
        self.batch_depth += 1;
        self.batch_depth == 1
    }

    /// Leave a batch. Returns `true` if the caller should flush now: the
    /// outermost batch closed, no flush is running and work is pending.
    pub fn end_batch(&mut self) -> bool {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.batch_depth == 0 && !self.is_flushing && !self.pending.is_empty()
    }

    /// Enter the flushing state. Returns `false` if a flush is already
    /// running.
    pub fn begin_flush(&mut self) -> bool {
        if self.is_flushing {
            return false;
        }
        self.is_flushing = true;
        self.flush_pending = false;
        true
    }

    pub fn end_flush(&mut self) {
        self.is_flushing = false;
    }

    /// Snapshot and clear the pending set.
    pub fn take_round(&mut self) -> Vec<EffectId> {
        self.pending.drain(..).collect()
    }

    /// Drop every pending job without running it.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.flush_pending = false;
    }

    pub fn contains(&self, effect: EffectId) -> bool {
        self.pending.contains(&effect)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(n: u32) -> EffectId {
        EffectId::new(n, 0)
    }

    #[test]
    fn enqueue_deduplicates_and_keeps_order() {
        let mut queue = JobQueue::new();
        assert!(queue.enqueue(effect(2)));
        assert!(queue.enqueue(effect(0)));
        assert!(!queue.enqueue(effect(2)));

        assert_eq!(queue.take_round(), vec![effect(2), effect(0)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn one_flush_request_per_quiescent_period() {
        let mut queue = JobQueue::new();
        assert!(queue.request_flush());
        assert!(!queue.request_flush());

        assert!(queue.begin_flush());
        queue.end_flush();
        assert!(queue.request_flush());
    }

    #[test]
    fn nested_batches_flush_at_outermost_boundary() {
        let mut queue = JobQueue::new();
        assert!(queue.begin_batch());
        assert!(!queue.begin_batch());
        assert_eq!(queue.state(), SchedulerState::Batching);

        queue.enqueue(effect(1));
        assert!(!queue.request_flush());

        assert!(!queue.end_batch());
        assert!(queue.end_batch());
        assert_eq!(queue.state(), SchedulerState::Idle);
    }

    #[test]
    fn batch_inside_flush_does_not_flush() {
        let mut queue = JobQueue::new();
        assert!(queue.begin_flush());
        queue.begin_batch();
        queue.enqueue(effect(1));

        assert!(!queue.end_batch());
        assert_eq!(queue.state(), SchedulerState::Flushing);
        assert!(!queue.begin_flush());
    }

    #[test]
    fn entries_added_after_snapshot_wait_for_next_round() {
        let mut queue = JobQueue::new();
        queue.enqueue(effect(1));
        let first = queue.take_round();
        queue.enqueue(effect(1));

        assert_eq!(first, vec![effect(1)]);
        assert_eq!(queue.take_round(), vec![effect(1)]);
    }
}
