//! Effect Implementation
//!
//! An Effect is a computation that re-runs whenever its dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies (unless it is lazy).
//!
//! 2. When any dependency changes, the effect's scheduler decides what
//!    happens: by default it is queued and runs in the next flush.
//!
//! 3. Running first checks the recorded dependency versions. A clean effect
//!    returns its cached value; a dirty one detaches from its old
//!    dependencies and tracks new ones during execution, so branches that
//!    are no longer taken stop triggering it.
//!
//! # Ordering
//!
//! Dependents of one node are notified in subscription order. There is no
//! topological or priority ordering across independent effects.
//!
//! # Errors
//!
//! A panic inside the body unwinds out of [`Effect::new`] or
//! [`Effect::run`] after the active-effect stack is restored. When the
//! scheduler runs the effect, the panic is caught and handed to the
//! `on_error` handler (or logged) so other pending effects still run.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use super::runtime::{RunOutcome, Runtime};
use super::subscriber::{EffectBody, ErrorHandler, NewEffect, Scheduler};
use super::EffectId;
use crate::error::ReactiveError;

/// How an effect is created and scheduled.
#[derive(Clone, Default)]
pub struct EffectOptions {
    lazy: bool,
    scheduler: Scheduler,
    name: Option<Cow<'static, str>>,
    on_error: Option<ErrorHandler>,
    static_deps: bool,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not run on creation; the first [`Effect::run`] collects
    /// dependencies.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Name used in log events.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Handler for panics caught while the scheduler runs this effect.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ReactiveError) + 'static,
    {
        self.on_error = Some(Rc::new(f));
        self
    }

    /// Keep the dependency set of the first run. Later runs neither detach
    /// nor add dependencies.
    pub fn static_deps(mut self) -> Self {
        self.static_deps = true;
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("scheduler", &self.scheduler)
            .field("name", &self.name)
            .field("on_error", &self.on_error.is_some())
            .field("static_deps", &self.static_deps)
            .finish()
    }
}

/// The typed body and its last result.
struct EffectCell<T> {
    body: RefCell<Box<dyn FnMut() -> T>>,
    value: RefCell<Option<T>>,
}

impl<T> EffectBody for EffectCell<T> {
    fn execute(&self) {
        let value = {
            let mut body = self.body.borrow_mut();
            (&mut **body)()
        };
        *self.value.borrow_mut() = Some(value);
    }
}

/// A computation that runs when its dependencies change.
///
/// Handles are cheap to clone. Dropping every handle does not stop the
/// effect; call [`stop`](Self::stop).
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let c = count.clone();
/// let effect = Effect::new(move || {
///     println!("Count is: {}", c.get());
/// });
///
/// count.set(5);
/// flush()?; // Prints: "Count is: 5"
/// ```
pub struct Effect<T: 'static = ()> {
    runtime: Runtime,
    id: EffectId,
    cell: Rc<EffectCell<T>>,
}

impl<T: 'static> Effect<T> {
    /// Create an effect on the current runtime and run it once.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        Self::with_options(f, EffectOptions::default())
    }

    pub fn with_options<F>(f: F, options: EffectOptions) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        Self::create_in(&Runtime::current(), f, options)
    }

    pub(crate) fn create_in<F>(runtime: &Runtime, f: F, options: EffectOptions) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        let cell = Rc::new(EffectCell {
            body: RefCell::new(Box::new(f) as Box<dyn FnMut() -> T>),
            value: RefCell::new(None),
        });
        let body: Rc<dyn EffectBody> = cell.clone();
        let id = runtime.register_effect(NewEffect {
            name: options.name,
            body,
            scheduler: options.scheduler,
            on_error: options.on_error,
            is_static: options.static_deps,
        });

        let effect = Self {
            runtime: runtime.clone(),
            id,
            cell,
        };
        if !options.lazy {
            // A body that panics on its first run never becomes live.
            let result = panic::catch_unwind(AssertUnwindSafe(|| runtime.run_effect(id)));
            if let Err(payload) = result {
                runtime.stop_effect(id);
                panic::resume_unwind(payload);
            }
        }
        effect
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Run the body if a dependency changed, and return the latest value.
    ///
    /// Returns the cached value without running when the effect is clean or
    /// already running, and `None` when it never produced a value.
    pub fn run(&self) -> Option<T>
    where
        T: Clone,
    {
        self.runtime.run_effect(self.id);
        self.last_value()
    }

    pub(crate) fn run_outcome(&self) -> RunOutcome {
        self.runtime.run_effect(self.id)
    }

    pub(crate) fn take_value(&self) -> Option<T> {
        self.cell.value.borrow_mut().take()
    }

    /// The value of the last completed run, without running.
    pub fn last_value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.cell.value.borrow().clone()
    }

    /// Detach from every dependency. Later changes never reach this effect.
    /// A run already in progress is not interrupted. Idempotent.
    pub fn stop(&self) {
        self.runtime.stop_effect(self.id);
    }

    pub fn is_stopped(&self) -> bool {
        !self.runtime.is_effect_live(self.id)
    }

    /// Number of times the body has completed.
    pub fn run_count(&self) -> u64 {
        self.runtime.effect_run_count(self.id)
    }

    pub fn dependency_count(&self) -> usize {
        self.runtime.effect_dependency_count(self.id)
    }
}

impl<T: 'static> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id,
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: 'static> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Runtime {
    /// Create an effect on this runtime and run it once.
    pub fn effect<T, F>(&self, f: F) -> Effect<T>
    where
        T: 'static,
        F: FnMut() -> T + 'static,
    {
        Effect::create_in(self, f, EffectOptions::default())
    }

    pub fn effect_with<T, F>(&self, f: F, options: EffectOptions) -> Effect<T>
    where
        T: 'static,
        F: FnMut() -> T + 'static,
    {
        Effect::create_in(self, f, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0));
        (count.clone(), count)
    }

    #[test]
    fn effect_runs_immediately() {
        let rt = Runtime::default();
        let (runs, seen) = counter();

        let effect = rt.effect(move || runs.set(runs.get() + 1));

        assert_eq!(seen.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_after_flush() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let _effect = {
            let signal = signal.clone();
            let log = log.clone();
            rt.effect(move || log.borrow_mut().push(signal.get()))
        };

        signal.set(1);
        assert_eq!(*log.borrow(), vec![0]);
        rt.flush().unwrap();
        assert_eq!(*log.borrow(), vec![0, 1]);
    }

    #[test]
    fn lazy_effect_waits_for_run() {
        let rt = Runtime::default();
        let (runs, seen) = counter();

        let effect = rt.effect_with(
            move || {
                runs.set(runs.get() + 1);
                runs.get()
            },
            EffectOptions::new().lazy(),
        );

        assert_eq!(seen.get(), 0);
        assert_eq!(effect.last_value(), None);
        assert_eq!(effect.run(), Some(1));
        // No dependencies: nothing can make it dirty again.
        assert_eq!(effect.run(), Some(1));
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn clean_run_returns_cached_value() {
        let rt = Runtime::default();
        let signal = rt.signal(2);
        let (runs, seen) = counter();

        let effect = {
            let signal = signal.clone();
            rt.effect(move || {
                runs.set(runs.get() + 1);
                signal.get() * 10
            })
        };

        assert_eq!(effect.run(), Some(20));
        assert_eq!(seen.get(), 1);

        signal.set(3);
        assert_eq!(effect.run(), Some(30));
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn sync_scheduler_runs_inside_write() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let (runs, seen) = counter();

        let _effect = {
            let signal = signal.clone();
            rt.effect_with(
                move || {
                    signal.get();
                    runs.set(runs.get() + 1);
                },
                EffectOptions::new().scheduler(Scheduler::Sync),
            )
        };

        signal.set(1);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn custom_scheduler_receives_job() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let jobs = Rc::new(RefCell::new(Vec::new()));

        let effect = {
            let signal = signal.clone();
            let jobs = jobs.clone();
            rt.effect_with(
                move || {
                    signal.get();
                },
                EffectOptions::new().scheduler(Scheduler::custom(move |job| {
                    jobs.borrow_mut().push(job.id());
                })),
            )
        };

        signal.set(1);
        signal.set(2);
        assert_eq!(*jobs.borrow(), vec![effect.id(), effect.id()]);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn custom_scheduler_can_defer_to_queue() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let (runs, seen) = counter();

        let _effect = {
            let signal = signal.clone();
            rt.effect_with(
                move || {
                    signal.get();
                    runs.set(runs.get() + 1);
                },
                EffectOptions::new().scheduler(Scheduler::custom(|job| job.enqueue())),
            )
        };

        signal.set(1);
        assert_eq!(seen.get(), 1);
        rt.flush().unwrap();
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn job_run_executes_immediately() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let (runs, seen) = counter();

        let _effect = {
            let signal = signal.clone();
            rt.effect_with(
                move || {
                    signal.get();
                    runs.set(runs.get() + 1);
                },
                EffectOptions::new().scheduler(Scheduler::custom(|job| job.run())),
            )
        };

        signal.set(1);
        assert_eq!(seen.get(), 2);
        assert!(rt.is_idle());
    }

    #[test]
    fn untracked_reads_are_not_dependencies() {
        let rt = Runtime::default();
        let tracked = rt.signal(1);
        let ignored = rt.signal(10);

        let effect = {
            let (tracked, ignored) = (tracked.clone(), ignored.clone());
            let runtime = rt.clone();
            rt.effect(move || tracked.get() + runtime.untrack(|| ignored.get()))
        };
        assert_eq!(effect.last_value(), Some(11));
        assert_eq!(effect.dependency_count(), 1);

        ignored.set(20);
        rt.flush().unwrap();
        assert_eq!(effect.run_count(), 1);

        tracked.set(2);
        rt.flush().unwrap();
        assert_eq!(effect.last_value(), Some(22));
    }

    #[test]
    fn stop_is_idempotent() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let (runs, seen) = counter();

        let effect = {
            let signal = signal.clone();
            rt.effect(move || {
                signal.get();
                runs.set(runs.get() + 1);
            })
        };

        effect.stop();
        effect.stop();
        assert!(effect.is_stopped());
        assert_eq!(signal.subscriber_count(), 0);

        signal.set(1);
        rt.flush().unwrap();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn branch_switch_drops_old_dependency() {
        let rt = Runtime::default();
        let flag = rt.signal(true);
        let a = rt.signal(1);
        let b = rt.signal(2);

        let effect = {
            let (flag, a, b) = (flag.clone(), a.clone(), b.clone());
            rt.effect(move || if flag.get() { a.get() } else { b.get() })
        };
        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 0);

        flag.set(false);
        rt.flush().unwrap();
        assert_eq!(effect.last_value(), Some(2));
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
    }

    #[test]
    fn static_deps_keep_first_dependency_set() {
        let rt = Runtime::default();
        let flag = rt.signal(true);
        let a = rt.signal(1);
        let b = rt.signal(2);

        let effect = {
            let (flag, a, b) = (flag.clone(), a.clone(), b.clone());
            rt.effect_with(
                move || if flag.get() { a.get() } else { b.get() },
                EffectOptions::new().static_deps(),
            )
        };

        flag.set(false);
        rt.flush().unwrap();
        assert_eq!(effect.last_value(), Some(2));
        assert_eq!(effect.dependency_count(), 2);
        assert_eq!(b.subscriber_count(), 0);

        // `a` is still a dependency even though the branch no longer reads it.
        a.set(10);
        rt.flush().unwrap();
        assert_eq!(effect.run_count(), 3);
    }

    #[test]
    fn panic_in_scheduled_run_goes_to_handler() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let errors = Rc::new(RefCell::new(Vec::new()));
        let (runs, seen) = counter();

        let _failing = {
            let signal = signal.clone();
            let errors = errors.clone();
            rt.effect_with(
                move || {
                    if signal.get() > 0 {
                        panic!("bad value");
                    }
                },
                EffectOptions::new()
                    .name("failing")
                    .on_error(move |error| errors.borrow_mut().push(error.clone())),
            )
        };
        let _healthy = {
            let signal = signal.clone();
            rt.effect(move || {
                signal.get();
                runs.set(runs.get() + 1);
            })
        };

        signal.set(1);
        rt.flush().unwrap();

        assert_eq!(seen.get(), 2);
        assert_eq!(errors.borrow().len(), 1);
        assert!(matches!(
            &errors.borrow()[0],
            ReactiveError::EffectPanicked { message, .. } if message == "bad value"
        ));
        assert!(rt.current_effect().is_none());
    }

    #[test]
    fn panic_on_creation_propagates_and_restores_stack() {
        let rt = Runtime::default();
        let signal = rt.signal(0);

        let result = {
            let signal = signal.clone();
            panic::catch_unwind(AssertUnwindSafe(|| {
                rt.effect(move || {
                    signal.get();
                    panic!("creation failure");
                })
            }))
        };

        assert!(result.is_err());
        assert!(rt.current_effect().is_none());
        assert_eq!(signal.subscriber_count(), 0);
        assert_eq!(rt.stats().live_effects, 0);
    }

    #[test]
    fn explicit_run_retries_after_panic() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let (runs, seen) = counter();

        let effect = {
            let signal = signal.clone();
            rt.effect_with(
                move || {
                    let value = signal.get();
                    runs.set(runs.get() + 1);
                    if runs.get() == 1 {
                        panic!("first run fails");
                    }
                    value
                },
                EffectOptions::new().lazy(),
            )
        };

        assert!(panic::catch_unwind(AssertUnwindSafe(|| effect.run())).is_err());
        assert_eq!(signal.subscriber_count(), 0);

        assert_eq!(effect.run(), Some(0));
        assert_eq!(seen.get(), 2);
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_stop() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let effect = {
            let (signal, log) = (signal.clone(), log.clone());
            let runtime = rt.clone();
            rt.effect(move || {
                let value = signal.get();
                log.borrow_mut().push(format!("run {value}"));
                let log = log.clone();
                runtime.on_cleanup(move || log.borrow_mut().push(format!("cleanup {value}")));
            })
        };

        signal.set(1);
        rt.flush().unwrap();
        effect.stop();
        effect.stop();

        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn clean_run_keeps_cleanup_pending() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let (cleanups, seen) = counter();

        let effect = {
            let signal = signal.clone();
            let runtime = rt.clone();
            rt.effect(move || {
                signal.get();
                let cleanups = cleanups.clone();
                runtime.on_cleanup(move || cleanups.set(cleanups.get() + 1));
            })
        };

        effect.run();
        assert_eq!(seen.get(), 0);

        effect.stop();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn panicking_cleanup_does_not_block_the_run() {
        let rt = Runtime::default();
        let signal = rt.signal(0);
        let (runs, seen) = counter();

        let _effect = {
            let signal = signal.clone();
            let runtime = rt.clone();
            rt.effect(move || {
                signal.get();
                runs.set(runs.get() + 1);
                runtime.on_cleanup(|| panic!("cleanup failure"));
            })
        };

        signal.set(1);
        rt.flush().unwrap();
        assert_eq!(seen.get(), 2);
        assert!(rt.current_effect().is_none());
    }

    #[test]
    fn reentrant_run_returns_cached_value() {
        let rt = Runtime::default();
        let slot: Rc<RefCell<Option<Effect<u32>>>> = Rc::new(RefCell::new(None));
        let (runs, seen) = counter();

        let effect = {
            let slot = slot.clone();
            rt.effect_with(
                move || {
                    runs.set(runs.get() + 1);
                    let inner = slot.borrow().clone();
                    if let Some(inner) = inner {
                        // Already running: returns the previous result.
                        return inner.run().unwrap_or(0) + 1;
                    }
                    1
                },
                EffectOptions::new().lazy(),
            )
        };
        *slot.borrow_mut() = Some(effect.clone());

        assert_eq!(effect.run(), Some(1));
        assert_eq!(effect.run(), Some(2));
        assert_eq!(seen.get(), 2);
        assert_eq!(effect.run_count(), 2);
    }
}
