//! Observability hook.
//!
//! Install a [`ReactiveObserver`] on a runtime to collect timing, cycle and
//! failure information without changing the public API of the primitives.
//! Every method has an empty default, so implementors pick what they need.

use std::time::Duration;

use super::EffectId;
use crate::error::ReactiveError;

pub trait ReactiveObserver {
    /// An effect body finished running.
    fn effect_ran(&self, _effect: EffectId, _elapsed: Duration) {}

    /// An effect was asked to run while it was already running. The request
    /// was ignored and the cached value returned.
    fn reentrant_run(&self, _effect: EffectId) {}

    /// An effect panicked while being run by the scheduler.
    fn effect_failed(&self, _effect: EffectId, _error: &ReactiveError) {}

    /// A flush drained the queue in `rounds` rounds.
    fn flush_completed(&self, _rounds: usize) {}

    /// A flush hit the round cap and dropped the pending jobs.
    fn cyclic_update(&self, _rounds: usize) {}
}
