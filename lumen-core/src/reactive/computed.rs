//! Computed Implementation
//!
//! A Computed is a derived value that caches its result. It is built from
//! two parts:
//!
//! - a lazy internal [`Effect`] whose body is the getter, and
//! - a synthetic graph node that its own readers depend on.
//!
//! When an upstream signal changes, the internal effect's scheduler does not
//! recompute. It only triggers the synthetic node, so readers are scheduled
//! while the computation itself waits until someone reads the value.
//!
//! Reading refreshes first: the internal effect re-runs if its dependencies
//! are stale, and the synthetic node's version is bumped only when the new
//! result differs under the equality policy. Readers whose computed came out
//! unchanged therefore stay clean.
//!
//! A computed that reads itself is broken by the effect re-entrancy guard:
//! the inner read sees the previous value, or [`ReactiveError::CyclicRead`]
//! if there is none yet.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::effect::{Effect, EffectOptions};
use super::equality::{EqualityPolicy, SameValue};
use super::runtime::{RunOutcome, Runtime};
use super::subscriber::Scheduler;
use crate::error::{ReactiveError, Result};
use crate::graph::{Derived, NodeId};

/// A cached value derived from other reactive values.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(2);
///
/// let c = count.clone();
/// let doubled = Computed::new(move || c.get() * 2);
///
/// assert_eq!(doubled.get(), 4);  // Computes
/// assert_eq!(doubled.get(), 4);  // Returns cached value
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

struct ComputedInner<T: 'static> {
    runtime: Runtime,
    node: NodeId,
    effect: Effect<T>,
    value: RefCell<Option<T>>,
    equals: EqualityPolicy<T>,
    disposed: Cell<bool>,
}

impl<T: 'static> ComputedInner<T> {
    /// Bring the cached value up to date.
    fn sync(&self) -> Result<()> {
        if self.disposed.get() {
            return Err(ReactiveError::computed_disposed());
        }

        match self.effect.run_outcome() {
            RunOutcome::Ran => {
                let Some(next) = self.effect.take_value() else {
                    return Ok(());
                };
                let changed = match &*self.value.borrow() {
                    Some(previous) => !self.equals.is_equal(previous, &next),
                    None => true,
                };
                if changed {
                    *self.value.borrow_mut() = Some(next);
                    self.runtime.bump_version(self.node);
                }
                Ok(())
            }
            RunOutcome::Clean => Ok(()),
            RunOutcome::Reentrant => {
                if self.value.borrow().is_some() {
                    Ok(())
                } else {
                    Err(ReactiveError::CyclicRead)
                }
            }
            RunOutcome::Stopped => Err(ReactiveError::computed_disposed()),
        }
    }
}

impl<T: 'static> Derived for ComputedInner<T> {
    fn refresh(&self) {
        if let Err(error) = self.sync() {
            trace!(node = %self.node, %error, "computed refresh skipped");
        }
    }
}

impl<T: 'static> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        if !self.disposed.get() {
            self.effect.stop();
            self.runtime.release_node(self.node);
        }
    }
}

impl<T: 'static> Computed<T> {
    /// Create a computed on the current runtime with the default equality.
    ///
    /// The getter does not run until the value is first read.
    pub fn new<F>(getter: F) -> Self
    where
        T: SameValue,
        F: FnMut() -> T + 'static,
    {
        Self::with_equality(getter, EqualityPolicy::same_value())
    }

    pub fn with_equality<F>(getter: F, equals: EqualityPolicy<T>) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        Self::create_in(&Runtime::current(), getter, equals)
    }

    pub(crate) fn create_in<F>(runtime: &Runtime, getter: F, equals: EqualityPolicy<T>) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        let node = runtime.acquire_node();
        let options = EffectOptions::new()
            .lazy()
            .name("computed")
            .scheduler(Scheduler::custom(move |job| job.runtime().trigger(node)));
        let effect = Effect::create_in(runtime, getter, options);

        let inner = Rc::new(ComputedInner {
            runtime: runtime.clone(),
            node,
            effect,
            value: RefCell::new(None),
            equals,
            disposed: Cell::new(false),
        });
        let weak = Rc::downgrade(&inner);
        let derived: Weak<dyn Derived> = weak;
        runtime.set_derived(node, derived);

        Self { inner }
    }

    /// The synthetic node readers depend on.
    pub fn id(&self) -> NodeId {
        self.inner.node
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Get the current value, recomputing if a dependency changed.
    ///
    /// # Panics
    ///
    /// Panics if the computed was disposed or read itself before producing
    /// a value. See [`try_get`](Self::try_get).
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.try_get().unwrap_or_else(|error| panic!("{error}"))
    }

    /// Same as [`get`](Self::get).
    pub fn value(&self) -> T
    where
        T: Clone,
    {
        self.get()
    }

    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.inner.sync()?;
        self.inner.runtime.track(self.inner.node);
        self.cached()
    }

    /// Get the current value without registering a dependency.
    ///
    /// # Panics
    ///
    /// Same as [`get`](Self::get).
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.inner
            .sync()
            .and_then(|()| self.cached())
            .unwrap_or_else(|error| panic!("{error}"))
    }

    fn cached(&self) -> Result<T>
    where
        T: Clone,
    {
        self.inner
            .value
            .borrow()
            .clone()
            .ok_or(ReactiveError::CyclicRead)
    }

    /// Number of times the result changed. Zero until first read.
    pub fn version(&self) -> u64 {
        self.inner.runtime.node_version(self.inner.node).unwrap_or(0)
    }

    /// Number of times the getter has run.
    pub fn compute_count(&self) -> u64 {
        self.inner.effect.run_count()
    }

    /// Number of effects currently depending on this computed.
    pub fn subscriber_count(&self) -> usize {
        if self.inner.disposed.get() {
            return 0;
        }
        self.inner.runtime.observer_count(self.inner.node)
    }

    /// Stop the internal effect, drop the cached value and release the node.
    /// Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.inner.effect.stop();
        self.inner.value.borrow_mut().take();
        self.inner.runtime.release_node(self.inner.node);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Computed");
        out.field("id", &self.inner.node);
        match self.inner.value.try_borrow() {
            Ok(value) => out.field("value", &*value),
            Err(_) => out.field("value", &"<borrowed>"),
        };
        out.field("version", &self.version())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Runtime {
    /// Create a computed on this runtime.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: SameValue + 'static,
        F: FnMut() -> T + 'static,
    {
        Computed::create_in(self, getter, EqualityPolicy::same_value())
    }

    pub fn computed_with<T, F>(&self, getter: F, equals: EqualityPolicy<T>) -> Computed<T>
    where
        T: 'static,
        F: FnMut() -> T + 'static,
    {
        Computed::create_in(self, getter, equals)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computed_is_lazy() {
        let rt = Runtime::default();
        let a = rt.signal(1);
        let b = rt.signal(2);

        let c = {
            let (a, b) = (a.clone(), b.clone());
            rt.computed(move || a.get() + b.get())
        };

        a.set(5);
        assert_eq!(c.compute_count(), 0);
        assert_eq!(c.get(), 7);
        assert_eq!(c.compute_count(), 1);
    }

    #[test]
    fn computed_caches_value_when_clean() {
        let rt = Runtime::default();
        let a = rt.signal(2);
        let unrelated = rt.signal(0);

        let doubled = {
            let a = a.clone();
            rt.computed(move || a.get() * 2)
        };

        assert_eq!(doubled.get(), 4);
        unrelated.set(1);
        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.compute_count(), 1);

        a.set(3);
        assert_eq!(doubled.get(), 6);
        assert_eq!(doubled.get(), 6);
        assert_eq!(doubled.compute_count(), 2);
    }

    #[test]
    fn unchanged_result_does_not_bump_version() {
        let rt = Runtime::default();
        let n = rt.signal(3);

        let parity = {
            let n = n.clone();
            rt.computed(move || n.get() % 2)
        };

        assert_eq!(parity.get(), 1);
        assert_eq!(parity.version(), 1);

        n.set(5);
        assert_eq!(parity.get(), 1);
        assert_eq!(parity.compute_count(), 2);
        assert_eq!(parity.version(), 1);
    }

    #[test]
    fn downstream_effect_skips_unchanged_computed() {
        let rt = Runtime::default();
        let n = rt.signal(2);
        let parity = {
            let n = n.clone();
            rt.computed(move || n.get() % 2)
        };

        let effect = {
            let parity = parity.clone();
            rt.effect(move || parity.get())
        };
        assert_eq!(effect.run_count(), 1);

        n.set(4);
        rt.flush().unwrap();
        assert_eq!(effect.run_count(), 1);

        n.set(5);
        rt.flush().unwrap();
        assert_eq!(effect.run_count(), 2);
        assert_eq!(effect.last_value(), Some(1));
    }

    #[test]
    fn constant_getter_runs_once() {
        let rt = Runtime::default();
        let unrelated = rt.signal(0);
        let calls = Rc::new(Cell::new(0));

        let answer = {
            let calls = calls.clone();
            rt.computed(move || {
                calls.set(calls.get() + 1);
                42
            })
        };

        assert_eq!(answer.get(), 42);
        unrelated.set(1);
        assert_eq!(answer.get(), 42);
        assert_eq!(answer.peek(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn getter_is_retried_after_panic() {
        let rt = Runtime::default();
        let a = rt.signal(0);
        let calls = Rc::new(Cell::new(0));

        let c = {
            let (a, calls) = (a.clone(), calls.clone());
            rt.computed(move || {
                let value = a.get();
                calls.set(calls.get() + 1);
                if calls.get() == 1 {
                    panic!("getter failure");
                }
                value + 1
            })
        };

        let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.try_get()));
        assert!(first.is_err());
        assert_eq!(a.subscriber_count(), 0);

        assert_eq!(c.try_get(), Ok(1));
        assert_eq!(calls.get(), 2);
        assert_eq!(a.subscriber_count(), 1);
    }

    #[test]
    fn peek_does_not_track() {
        let rt = Runtime::default();
        let a = rt.signal(1);
        let c = {
            let a = a.clone();
            rt.computed(move || a.get() + 1)
        };

        let effect = {
            let c = c.clone();
            rt.effect(move || c.peek())
        };

        assert_eq!(effect.last_value(), Some(2));
        assert_eq!(c.subscriber_count(), 0);
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn chained_computeds() {
        let rt = Runtime::default();
        let base = rt.signal(1);
        let plus_one = {
            let base = base.clone();
            rt.computed(move || base.get() + 1)
        };
        let times_ten = {
            let plus_one = plus_one.clone();
            rt.computed(move || plus_one.get() * 10)
        };

        assert_eq!(times_ten.get(), 20);
        base.set(4);
        assert_eq!(times_ten.get(), 50);
        assert_eq!(plus_one.compute_count(), 2);
        assert_eq!(times_ten.compute_count(), 2);
    }

    #[test]
    fn self_read_reports_cyclic_read() {
        let rt = Runtime::default();
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let seen = Rc::new(RefCell::new(None));

        let c = {
            let slot = slot.clone();
            let seen = seen.clone();
            rt.computed(move || {
                let me = slot.borrow().clone();
                if let Some(me) = me {
                    *seen.borrow_mut() = Some(me.try_get());
                }
                1
            })
        };
        *slot.borrow_mut() = Some(c.clone());

        assert_eq!(c.get(), 1);
        assert_eq!(*seen.borrow(), Some(Err(ReactiveError::CyclicRead)));
        assert!(rt.current_effect().is_none());
    }

    #[test]
    fn dispose_fails_fast_and_releases() {
        let rt = Runtime::default();
        let a = rt.signal(1);
        let c = {
            let a = a.clone();
            rt.computed(move || a.get())
        };
        assert_eq!(c.get(), 1);
        assert_eq!(a.subscriber_count(), 1);

        c.dispose();
        c.dispose();
        assert!(c.is_disposed());
        assert_eq!(c.try_get(), Err(ReactiveError::computed_disposed()));
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(rt.stats().live_effects, 0);
    }

    #[test]
    fn dropping_last_handle_stops_internal_effect() {
        let rt = Runtime::default();
        let a = rt.signal(1);
        let c = {
            let a = a.clone();
            rt.computed(move || a.get())
        };
        c.get();
        assert_eq!(rt.stats().live_effects, 1);

        drop(c);
        assert_eq!(rt.stats().live_effects, 0);
        assert_eq!(rt.stats().live_nodes, 1);
        assert_eq!(a.subscriber_count(), 0);
    }
}
