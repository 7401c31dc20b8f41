//! Batching and the flush loop.
//!
//! Writes made inside [`Runtime::batch`] only enqueue their effects; the
//! queue is flushed once, when the outermost batch closes. Writes made
//! outside a batch ask for a deferred flush through the runtime's
//! [`Deferral`], so several writes in one synchronous turn still coalesce
//! into a single flush. Without a deferral installed the host drives the
//! queue itself with [`Runtime::flush`] or [`Runtime::wait_for_jobs`].

use std::rc::Rc;

use tracing::{debug, error, warn};

use super::runtime::Runtime;
use crate::error::{ReactiveError, Result};
use crate::graph::SchedulerState;

/// Runs a task "soon", after the current synchronous turn.
pub trait Deferral {
    fn defer(&self, task: Box<dyn FnOnce()>);
}

/// Defers onto the current tokio `LocalSet` with `spawn_local`.
///
/// # Panics
///
/// Deferring panics when called outside a `LocalSet`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLocalDeferral;

impl Deferral for TokioLocalDeferral {
    fn defer(&self, task: Box<dyn FnOnce()>) {
        tokio::task::spawn_local(async move { task() });
    }
}

impl Runtime {
    /// Install the primitive used to schedule flushes for writes made
    /// outside a batch.
    ///
    /// Work already pending is scheduled right away.
    pub fn set_deferral(&self, deferral: impl Deferral + 'static) {
        *self.inner.deferral.borrow_mut() = Some(Rc::new(deferral));
        let pending = !self.inner.queue.borrow().is_empty();
        if pending {
            self.schedule_flush();
        }
    }

    pub fn clear_deferral(&self) {
        self.inner.deferral.borrow_mut().take();
    }

    /// Hand a flush to the deferral, at most once per quiescent period.
    /// Without a deferral nothing is marked pending.
    pub(crate) fn schedule_flush(&self) {
        let deferral = self.inner.deferral.borrow().clone();
        let Some(deferral) = deferral else {
            return;
        };
        if !self.inner.queue.borrow_mut().request_flush() {
            return;
        }

        let weak = Rc::downgrade(&self.inner);
        deferral.defer(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let runtime = Runtime { inner };
            if !runtime.inner.queue.borrow().flush_pending() {
                return;
            }
            if let Err(error) = runtime.flush() {
                debug!(%error, "deferred flush aborted");
            }
        }));
    }

    /// Run every pending effect.
    ///
    /// The queue is drained in rounds: each round runs a snapshot of the
    /// pending set, and effects enqueued meanwhile wait for the next round.
    /// A flush requested while one is already running returns immediately.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::CyclicUpdate`] when the number of rounds exceeds
    /// [`RuntimeConfig::max_flush_rounds`](crate::RuntimeConfig). The queue is
    /// cleared before returning.
    pub fn flush(&self) -> Result<()> {
        if !self.inner.queue.borrow_mut().begin_flush() {
            return Ok(());
        }
        let _flushing = FlushScope { runtime: self };

        let max_rounds = self.inner.config.max_flush_rounds;
        let mut rounds = 0;
        loop {
            let round = self.inner.queue.borrow_mut().take_round();
            if round.is_empty() {
                break;
            }
            if rounds >= max_rounds {
                self.inner.queue.borrow_mut().clear();
                error!(
                    rounds = max_rounds,
                    dropped = round.len(),
                    "cyclic update detected, pending effects dropped"
                );
                self.report_observer_cycle(max_rounds);
                return Err(ReactiveError::CyclicUpdate { rounds: max_rounds });
            }

            rounds += 1;
            debug!(round = rounds, jobs = round.len(), "flush round");
            for effect in round {
                self.run_guarded(effect);
            }
        }

        self.report_flush(rounds);
        Ok(())
    }

    /// Group writes so their effects run once, after `f` returns.
    ///
    /// Batches nest; only the outermost one flushes. A batch opened while a
    /// flush is running leaves its effects to that flush. A cyclic update
    /// during the closing flush is logged; use [`try_batch`](Self::try_batch)
    /// to observe it.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let (value, _flushed) = self.run_batch(f);
        value
    }

    /// Like [`batch`](Self::batch), returning the result of the closing flush.
    pub fn try_batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let (value, flushed) = self.run_batch(f);
        flushed.map(|()| value)
    }

    fn run_batch<R>(&self, f: impl FnOnce() -> R) -> (R, Result<()>) {
        self.inner.queue.borrow_mut().begin_batch();
        let mut scope = BatchScope {
            runtime: self,
            open: true,
        };

        let value = f();

        if scope.close() {
            (value, self.flush())
        } else {
            (value, Ok(()))
        }
    }

    /// Flush until the queue is empty and the scheduler is idle, yielding to
    /// the executor between passes so deferred tasks get to run.
    pub async fn wait_for_jobs(&self) -> Result<()> {
        loop {
            self.flush()?;
            tokio::task::yield_now().await;
            if self.is_idle() {
                return Ok(());
            }
        }
    }

    /// No pending jobs and no batch or flush in progress.
    pub fn is_idle(&self) -> bool {
        let queue = self.inner.queue.borrow();
        queue.is_empty() && queue.state() == SchedulerState::Idle
    }
}

struct FlushScope<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushScope<'_> {
    fn drop(&mut self) {
        self.runtime.inner.queue.borrow_mut().end_flush();
    }
}

/// Closes the batch on unwind. Work left pending by a panicking batch is
/// handed to the deferral instead of being flushed mid-unwind.
struct BatchScope<'a> {
    runtime: &'a Runtime,
    open: bool,
}

impl BatchScope<'_> {
    /// Returns `true` if the caller should flush now.
    fn close(&mut self) -> bool {
        self.open = false;
        self.runtime.inner.queue.borrow_mut().end_batch()
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let pending = self.runtime.inner.queue.borrow_mut().end_batch();
        if pending {
            warn!("batch closed by a panic; pending effects deferred");
            self.runtime.schedule_flush();
        }
    }
}
