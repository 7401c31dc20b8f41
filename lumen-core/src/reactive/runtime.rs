//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds
//! and effects. It owns the node pool, the effect arena, the active-effect
//! stack and the job queue of one reactive graph.
//!
//! # How It Works
//!
//! 1. Reading a signal inside a running effect calls [`Runtime::track`],
//!    which links the effect into the signal node's observer list and
//!    records the node's version.
//!
//! 2. Writing a signal that changed bumps its version and calls
//!    [`Runtime::trigger`], which hands every observer to its scheduler:
//!    the job queue by default, a synchronous run, or a custom hook.
//!
//! 3. Running an effect first checks whether any recorded version is out
//!    of date (pulling computeds up to date on the way). Clean effects
//!    return their cached value; dirty ones detach, re-run and re-track.
//!
//! # Threading
//!
//! A runtime is single-threaded: handles are `Rc`-based and `!Send`. Each
//! thread gets its own default runtime through [`Runtime::current`];
//! independent graphs (tests, multiple hosts) create their own with
//! [`Runtime::new`] and make it current with [`Runtime::enter`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{error, trace, warn};

use super::batch::Deferral;
use super::context::{ContextGuard, ContextStack};
use super::observer::ReactiveObserver;
use super::proxy::ObjectInner;
use super::subscriber::{Cleanup, Dependency, EffectTable, Job, NewEffect, Scheduler};
use super::EffectId;
use crate::config::RuntimeConfig;
use crate::error::{ConfigError, ReactiveError};
use crate::graph::{Derived, JobQueue, NodeId, NodePool, SchedulerState};

thread_local! {
    static CURRENT: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// What [`Runtime::run_effect`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// The body executed.
    Ran,
    /// No dependency changed; the cached value stands.
    Clean,
    /// The effect is already running; the request was ignored.
    Reentrant,
    /// The effect was stopped.
    Stopped,
}

/// Point-in-time counters for a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    pub live_nodes: usize,
    pub free_nodes: usize,
    pub allocated_nodes: usize,
    pub live_effects: usize,
    pub pending_jobs: usize,
    pub state: SchedulerState,
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) pool: RefCell<NodePool>,
    pub(crate) effects: RefCell<EffectTable>,
    pub(crate) context: RefCell<ContextStack>,
    pub(crate) queue: RefCell<JobQueue>,
    pub(crate) proxies: RefCell<HashMap<usize, Weak<ObjectInner>>>,
    pub(crate) observer: RefCell<Option<Rc<dyn ReactiveObserver>>>,
    pub(crate) deferral: RefCell<Option<Rc<dyn Deferral>>>,
}

/// Handle to one reactive graph. Cloning is cheap and shares the graph.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create an isolated runtime.
    ///
    /// Zero-valued limits in `config` are raised to 1; use
    /// [`try_new`](Self::try_new) to reject them instead.
    ///
    /// Effect bodies usually own signal handles, and every handle holds the
    /// runtime, so a runtime with live effects is never freed on its own.
    /// Stop the effects (or call [`stop_all`](Self::stop_all)) when the graph
    /// is no longer needed.
    pub fn new(mut config: RuntimeConfig) -> Self {
        if let Err(error) = config.validate() {
            warn!(%error, "runtime config clamped");
            config.pool_batch_size = config.pool_batch_size.max(1);
            config.max_flush_rounds = config.max_flush_rounds.max(1);
        }
        let pool = NodePool::new(config.pool_batch_size);
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                pool: RefCell::new(pool),
                effects: RefCell::new(EffectTable::default()),
                context: RefCell::new(ContextStack::default()),
                queue: RefCell::new(JobQueue::new()),
                proxies: RefCell::new(HashMap::new()),
                observer: RefCell::new(None),
                deferral: RefCell::new(None),
            }),
        }
    }

    /// Create an isolated runtime, rejecting an invalid config.
    pub fn try_new(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// The runtime that free functions on this thread use.
    ///
    /// Created with the default config on first use.
    pub fn current() -> Runtime {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(Runtime::default)
                .clone()
        })
    }

    /// Make this runtime current while `f` runs. The previous one is
    /// restored afterwards, also when `f` panics.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore(Option<Runtime>);

        impl Drop for Restore {
            fn drop(&mut self) {
                let previous = self.0.take();
                let _replaced = CURRENT.with(|current| current.replace(previous));
            }
        }

        let previous = CURRENT.with(|current| current.replace(Some(self.clone())));
        let _restore = Restore(previous);
        f()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether both handles point at the same graph.
    pub fn same_runtime(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn stats(&self) -> RuntimeStats {
        let pool = self.inner.pool.borrow();
        let queue = self.inner.queue.borrow();
        RuntimeStats {
            live_nodes: pool.live(),
            free_nodes: pool.free(),
            allocated_nodes: pool.capacity(),
            live_effects: self.inner.effects.borrow().live(),
            pending_jobs: queue.len(),
            state: queue.state(),
        }
    }

    pub fn set_observer(&self, observer: impl ReactiveObserver + 'static) {
        *self.inner.observer.borrow_mut() = Some(Rc::new(observer));
    }

    pub fn clear_observer(&self) {
        self.inner.observer.borrow_mut().take();
    }

    fn observer(&self) -> Option<Rc<dyn ReactiveObserver>> {
        self.inner.observer.borrow().clone()
    }

    pub(crate) fn context(&self) -> &RefCell<ContextStack> {
        &self.inner.context
    }

    /// The effect currently collecting dependencies, if any.
    pub fn current_effect(&self) -> Option<EffectId> {
        self.inner.context.borrow().current()
    }

    /// Run `f` without registering any dependencies.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = ContextGuard::enter(self, None);
        f()
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    pub(crate) fn acquire_node(&self) -> NodeId {
        self.inner.pool.borrow_mut().acquire()
    }

    pub(crate) fn release_node(&self, node: NodeId) {
        self.inner.pool.borrow_mut().release(node);
    }

    pub(crate) fn node_version(&self, node: NodeId) -> Option<u64> {
        self.inner.pool.borrow().version(node)
    }

    pub(crate) fn bump_version(&self, node: NodeId) -> Option<u64> {
        self.inner.pool.borrow_mut().bump_version(node)
    }

    pub(crate) fn has_observers(&self, node: NodeId) -> bool {
        self.inner.pool.borrow().has_observers(node)
    }

    pub(crate) fn observer_count(&self, node: NodeId) -> usize {
        self.inner.pool.borrow().observer_count(node)
    }

    pub(crate) fn set_derived(&self, node: NodeId, derived: Weak<dyn Derived>) {
        self.inner.pool.borrow_mut().set_derived(node, derived);
    }

    // ------------------------------------------------------------------
    // Track / trigger
    // ------------------------------------------------------------------

    /// Register the current effect as a dependent of `node`.
    ///
    /// The recorded version is refreshed even if the dependency already
    /// exists, so a second read in the same run never looks stale.
    pub fn track(&self, node: NodeId) {
        let Some(effect) = self.current_effect() else {
            return;
        };
        let Some(version) = self.node_version(node) else {
            return;
        };

        let mut effects = self.inner.effects.borrow_mut();
        let Some(slot) = effects.get_mut(effect) else {
            return;
        };

        if let Some(dep) = slot.deps.get_mut(&node) {
            dep.version = version;
            return;
        }
        if slot.is_static && slot.run_count > 0 {
            return;
        }

        let Some(link) = self.inner.pool.borrow_mut().link(node, effect) else {
            return;
        };
        slot.deps.insert(node, Dependency { link, version });
        trace!(%effect, %node, version, "tracked dependency");
    }

    /// Notify every observer of `node`, in subscription order.
    pub fn trigger(&self, node: NodeId) {
        let observers = self.inner.pool.borrow().observers(node);
        trace!(%node, observers = observers.len(), "trigger");

        for effect in observers {
            let scheduler = match self.inner.effects.borrow().get(effect) {
                Some(slot) => slot.scheduler.clone(),
                None => continue,
            };
            match scheduler {
                Scheduler::Queue => self.queue_job(effect),
                Scheduler::Sync => self.run_guarded(effect),
                Scheduler::Custom(hook) => hook(&Job::new(self.clone(), effect)),
            }
        }
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    pub(crate) fn register_effect(&self, new: NewEffect) -> EffectId {
        self.inner.effects.borrow_mut().insert(new)
    }

    pub(crate) fn is_effect_live(&self, id: EffectId) -> bool {
        self.inner.effects.borrow().get(id).is_some()
    }

    pub(crate) fn effect_run_count(&self, id: EffectId) -> u64 {
        self.inner
            .effects
            .borrow()
            .get(id)
            .map_or(0, |slot| slot.run_count)
    }

    pub(crate) fn effect_dependency_count(&self, id: EffectId) -> usize {
        self.inner
            .effects
            .borrow()
            .get(id)
            .map_or(0, |slot| slot.deps.len())
    }

    /// Run an effect if it is dirty.
    ///
    /// Panics from the body propagate to the caller after the context stack
    /// and the running flag have been restored. A run that panicked leaves
    /// the effect dirty, so the next request retries it.
    pub(crate) fn run_effect(&self, id: EffectId) -> RunOutcome {
        let (body, deps, keep_deps, force) = {
            let effects = self.inner.effects.borrow();
            let Some(slot) = effects.get(id) else {
                return RunOutcome::Stopped;
            };
            if slot.is_running {
                drop(effects);
                self.report_reentrant(id);
                return RunOutcome::Reentrant;
            }
            let Some(body) = slot.body.clone() else {
                return RunOutcome::Stopped;
            };
            let deps: SmallVec<[(NodeId, u64); 8]> = slot
                .deps
                .iter()
                .map(|(node, dep)| (*node, dep.version))
                .collect();
            (
                body,
                deps,
                slot.is_static && slot.run_count > 0,
                slot.force_run,
            )
        };

        if !force && !self.is_stale(&deps) {
            return RunOutcome::Clean;
        }

        if !keep_deps {
            self.detach_all(id);
        }

        match self.inner.effects.borrow_mut().get_mut(id) {
            Some(slot) => slot.is_running = true,
            // Stopped while a computed dependency was being refreshed.
            None => return RunOutcome::Stopped,
        }

        let started = Instant::now();
        {
            let mut scope = RunScope {
                runtime: self,
                id,
                completed: false,
                _ctx: ContextGuard::enter(self, Some(id)),
            };
            self.run_cleanups(id);
            body.execute();
            scope.completed = true;
        }
        let elapsed = started.elapsed();

        if let Some(slot) = self.inner.effects.borrow_mut().get_mut(id) {
            slot.run_count += 1;
        }
        self.after_run(id, elapsed);
        RunOutcome::Ran
    }

    /// Run an effect, catching a panic from its body and reporting it to the
    /// effect's error handler (or the log). Used by the scheduler so one
    /// failing effect cannot abort a flush.
    pub(crate) fn run_guarded(&self, id: EffectId) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_effect(id)));
        if let Err(payload) = result {
            let error = ReactiveError::EffectPanicked {
                effect: id,
                message: panic_message(payload.as_ref()),
            };
            self.report_failure(id, &error);
        }
    }

    /// Whether any recorded dependency version is out of date. Computed
    /// dependencies are brought up to date first.
    fn is_stale(&self, deps: &[(NodeId, u64)]) -> bool {
        for &(node, recorded) in deps {
            let derived = self.inner.pool.borrow().derived(node);
            if let Some(derived) = derived {
                derived.refresh();
            }
            match self.node_version(node) {
                Some(version) if version != recorded => return true,
                // Released nodes can never change again.
                _ => {}
            }
        }
        false
    }

    /// Remove the effect from every observer list it is on.
    pub(crate) fn detach_all(&self, id: EffectId) {
        let deps = match self.inner.effects.borrow_mut().get_mut(id) {
            Some(slot) => std::mem::take(&mut slot.deps),
            None => return,
        };
        let mut pool = self.inner.pool.borrow_mut();
        for (node, dep) in deps {
            pool.unlink(node, dep.link);
        }
    }

    /// Register `f` to run before the current effect's next run, or when it
    /// is stopped, whichever comes first.
    ///
    /// Returns `false` (and drops `f` without calling it) when no effect is
    /// running.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) -> bool {
        let Some(id) = self.current_effect() else {
            return false;
        };
        let cleanup: Cleanup = Box::new(f);
        let rejected = match self.inner.effects.borrow_mut().get_mut(id) {
            Some(slot) => {
                slot.cleanups.push(cleanup);
                None
            }
            None => Some(cleanup),
        };
        // Dropped outside the arena borrow: `f` may own reactive handles.
        let accepted = rejected.is_none();
        drop(rejected);
        accepted
    }

    fn run_cleanups(&self, id: EffectId) {
        let cleanups = match self.inner.effects.borrow_mut().get_mut(id) {
            Some(slot) => std::mem::take(&mut slot.cleanups),
            None => return,
        };
        self.call_cleanups(id, cleanups);
    }

    /// Call cleanups untracked, in registration order. A panicking cleanup
    /// is logged and the rest still run.
    fn call_cleanups(&self, id: EffectId, cleanups: Vec<Cleanup>) {
        if cleanups.is_empty() {
            return;
        }
        let _ctx = ContextGuard::enter(self, None);
        for cleanup in cleanups {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                let message = panic_message(payload.as_ref());
                error!(effect = %id, %message, "effect cleanup panicked");
            }
        }
    }

    /// Stop every live effect, including the internal effects of computeds.
    /// Breaks the handle cycles described on [`new`](Self::new).
    pub fn stop_all(&self) {
        let ids = self.inner.effects.borrow().ids();
        for id in ids {
            self.stop_effect(id);
        }
    }

    /// Detach and free an effect. Idempotent.
    pub(crate) fn stop_effect(&self, id: EffectId) {
        let removed = self.inner.effects.borrow_mut().remove(id);
        let Some(removed) = removed else {
            return;
        };

        {
            let mut pool = self.inner.pool.borrow_mut();
            for (node, dep) in &removed.deps {
                pool.unlink(*node, dep.link);
            }
        }
        trace!(effect = %id, "effect stopped");
        self.call_cleanups(id, removed.cleanups);
        // The body may own signals and computeds; drop it with no borrows held.
        drop(removed.body);
    }

    pub(crate) fn queue_job(&self, id: EffectId) {
        let added = self.inner.queue.borrow_mut().enqueue(id);
        if added {
            self.schedule_flush();
        }
    }

    fn effect_name(&self, id: EffectId) -> Option<String> {
        self.inner
            .effects
            .borrow()
            .get(id)
            .and_then(|slot| slot.name.as_ref().map(|name| name.to_string()))
    }

    fn after_run(&self, id: EffectId, elapsed: Duration) {
        if let Some(threshold) = self.inner.config.slow_effect_threshold_ms {
            if elapsed >= Duration::from_millis(threshold) {
                let name = self.effect_name(id);
                warn!(
                    effect = %id,
                    name = name.as_deref().unwrap_or("anonymous"),
                    elapsed_ms = elapsed.as_secs_f64() * 1_000.0,
                    "slow effect"
                );
            }
        }
        if let Some(observer) = self.observer() {
            observer.effect_ran(id, elapsed);
        }
    }

    fn report_reentrant(&self, id: EffectId) {
        if self.inner.config.report_cycles {
            let name = self.effect_name(id);
            warn!(
                effect = %id,
                name = name.as_deref().unwrap_or("anonymous"),
                "effect re-entered itself; returning cached value"
            );
        }
        if let Some(observer) = self.observer() {
            observer.reentrant_run(id);
        }
    }

    fn report_failure(&self, id: EffectId, error: &ReactiveError) {
        let handler = self
            .inner
            .effects
            .borrow()
            .get(id)
            .and_then(|slot| slot.on_error.clone());

        if let Some(observer) = self.observer() {
            observer.effect_failed(id, error);
        }
        match handler {
            Some(handler) => handler(error),
            None => error!(effect = %id, %error, "effect failed"),
        }
    }

    pub(crate) fn report_observer_cycle(&self, rounds: usize) {
        if let Some(observer) = self.observer() {
            observer.cyclic_update(rounds);
        }
    }

    pub(crate) fn report_flush(&self, rounds: usize) {
        if let Some(observer) = self.observer() {
            observer.flush_completed(rounds);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Clears the running flag and pops the context frame of an effect run,
/// on normal exit and on unwind alike. An unfinished run drops the
/// dependencies it collected and marks the effect for a forced re-run.
struct RunScope<'a> {
    runtime: &'a Runtime,
    id: EffectId,
    completed: bool,
    _ctx: ContextGuard<'a>,
}

impl Drop for RunScope<'_> {
    fn drop(&mut self) {
        let partial = {
            let mut effects = self.runtime.inner.effects.borrow_mut();
            let Some(slot) = effects.get_mut(self.id) else {
                return;
            };
            slot.is_running = false;
            slot.force_run = !self.completed;
            if self.completed || (slot.is_static && slot.run_count > 0) {
                None
            } else {
                Some(std::mem::take(&mut slot.deps))
            }
        };

        if let Some(deps) = partial {
            let mut pool = self.runtime.inner.pool.borrow_mut();
            for (node, dep) in deps {
                pool.unlink(node, dep.link);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
