//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and a
//! pooled graph node that tracks which effects depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a running effect (or computed), the
//!    runtime links that effect into the node's observer list and records
//!    the node's version.
//!
//! 2. When a write is accepted, the node's version is bumped and every
//!    observer is handed to its scheduler.
//!
//! 3. A write to a signal nobody observes only stores the value. The
//!    comparison and the version bump are skipped because nothing can be
//!    stale yet.
//!
//! # Memory Layout
//!
//! The typed value, the equality policy and manual subscriptions live in the
//! handle. The graph only sees a fixed-shape node, so the pool stays
//! type-free. Dropping the last handle returns the node to the pool.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::error;

use super::equality::{EqualityPolicy, SameValue};
use super::runtime::Runtime;
use super::SubscriptionId;
use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

type Subscription<T> = Rc<dyn Fn(&T, &T)>;

/// A reactive cell holding a value of type `T`.
///
/// Cloning a signal clones the handle; both handles share the value.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies dependents)
/// count.set(5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

struct SignalInner<T: 'static> {
    runtime: Runtime,
    node: NodeId,
    value: RefCell<T>,
    equals: EqualityPolicy<T>,
    disposed: Cell<bool>,
    subscriptions: RefCell<Vec<(SubscriptionId, Subscription<T>)>>,
}

impl<T: 'static> Drop for SignalInner<T> {
    fn drop(&mut self) {
        if !self.disposed.get() {
            self.runtime.release_node(self.node);
        }
    }
}

impl<T: 'static> Signal<T> {
    /// Create a signal on the current runtime with the default equality.
    pub fn new(value: T) -> Self
    where
        T: SameValue,
    {
        Self::with_equality(value, EqualityPolicy::same_value())
    }

    /// Create a signal on the current runtime with a custom equality policy.
    pub fn with_equality(value: T, equals: EqualityPolicy<T>) -> Self {
        Self::create_in(&Runtime::current(), value, equals)
    }

    pub(crate) fn create_in(runtime: &Runtime, value: T, equals: EqualityPolicy<T>) -> Self {
        let node = runtime.acquire_node();
        Self {
            inner: Rc::new(SignalInner {
                runtime: runtime.clone(),
                node,
                value: RefCell::new(value),
                equals,
                disposed: Cell::new(false),
                subscriptions: RefCell::new(Vec::new()),
            }),
        }
    }

    /// The pooled node backing this signal.
    pub fn id(&self) -> NodeId {
        self.inner.node
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    fn check(&self) -> Result<()> {
        if self.inner.disposed.get() {
            Err(ReactiveError::signal_disposed())
        } else {
            Ok(())
        }
    }

    /// Get the current value.
    ///
    /// If called while an effect is running, the effect becomes a dependent.
    ///
    /// # Panics
    ///
    /// Panics if the signal was disposed.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.try_get().unwrap_or_else(|error| panic!("{error}"))
    }

    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.check()?;
        self.inner.runtime.track(self.inner.node);
        Ok(self.inner.value.borrow().clone())
    }

    /// Borrow the value for a tracked read without cloning it.
    ///
    /// # Panics
    ///
    /// Panics if the signal was disposed, or if `f` writes this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Err(error) = self.check() {
            panic!("{error}");
        }
        self.inner.runtime.track(self.inner.node);
        f(&self.inner.value.borrow())
    }

    /// Get the current value without registering a dependency.
    ///
    /// # Panics
    ///
    /// Panics if the signal was disposed.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        if let Err(error) = self.check() {
            panic!("{error}");
        }
        self.inner.value.borrow().clone()
    }

    /// Set a new value and notify dependents if it changed.
    ///
    /// # Panics
    ///
    /// Panics if the signal was disposed.
    pub fn set(&self, value: T) {
        if let Err(error) = self.try_set(value) {
            panic!("{error}");
        }
    }

    pub fn try_set(&self, value: T) -> Result<()> {
        self.check()?;
        let inner = &*self.inner;

        let has_subscriptions = !inner.subscriptions.borrow().is_empty();
        if !has_subscriptions && !inner.runtime.has_observers(inner.node) {
            *inner.value.borrow_mut() = value;
            return Ok(());
        }

        if inner.equals.is_equal(&inner.value.borrow(), &value) {
            return Ok(());
        }

        let previous = inner.value.replace(value);
        inner.runtime.bump_version(inner.node);
        if has_subscriptions {
            self.notify_subscriptions(&previous);
        }
        inner.runtime.trigger(inner.node);
        Ok(())
    }

    /// Update the value using a function of the current one.
    ///
    /// # Panics
    ///
    /// Panics if the signal was disposed.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if let Err(error) = self.try_update(f) {
            panic!("{error}");
        }
    }

    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        self.check()?;
        let next = f(&self.inner.value.borrow());
        self.try_set(next)
    }

    /// Number of accepted changes since creation. Writes taken on the
    /// no-observer fast path are not counted.
    pub fn version(&self) -> u64 {
        self.inner.runtime.node_version(self.inner.node).unwrap_or(0)
    }

    /// Number of effects currently depending on this signal.
    pub fn subscriber_count(&self) -> usize {
        if self.inner.disposed.get() {
            return 0;
        }
        self.inner.runtime.observer_count(self.inner.node)
    }

    /// Register a callback invoked synchronously with `(new, previous)` on
    /// every accepted change.
    ///
    /// Callbacks run before dependent effects are scheduled. A panicking
    /// callback is logged and does not stop the others. Callbacks must not
    /// write this signal.
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&T, &T) + 'static,
    {
        let id = SubscriptionId::new();
        self.inner.subscriptions.borrow_mut().push((id, Rc::new(f)));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.inner.subscriptions.borrow_mut();
        let before = subscriptions.len();
        subscriptions.retain(|(existing, _)| *existing != id);
        subscriptions.len() != before
    }

    fn notify_subscriptions(&self, previous: &T) {
        let callbacks: Vec<Subscription<T>> = self
            .inner
            .subscriptions
            .borrow()
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();

        let current = self.inner.value.borrow();
        for callback in callbacks {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(&current, previous)));
            if result.is_err() {
                error!(node = %self.inner.node, "signal subscription panicked");
            }
        }
    }

    /// Release the node and drop every subscription. Further reads and
    /// writes fail with [`ReactiveError::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.inner.subscriptions.borrow_mut().clear();
        self.inner.runtime.release_node(self.inner.node);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// A handle that shares this signal's value but cannot write it.
    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal {
            signal: self.clone(),
        }
    }
}

/// Read half of a [`Signal`]. Reads behave exactly like the signal's own.
pub struct ReadSignal<T: 'static> {
    signal: Signal<T>,
}

impl<T: 'static> ReadSignal<T> {
    pub fn id(&self) -> NodeId {
        self.signal.id()
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.signal.get()
    }

    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.signal.try_get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with(f)
    }

    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.signal.peek()
    }

    pub fn version(&self) -> u64 {
        self.signal.version()
    }

    pub fn subscriber_count(&self) -> usize {
        self.signal.subscriber_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.signal.is_disposed()
    }
}

impl<T: 'static> From<Signal<T>> for ReadSignal<T> {
    fn from(signal: Signal<T>) -> Self {
        Self { signal }
    }
}

impl<T: 'static> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: Debug + 'static> Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadSignal").field(&self.signal).finish()
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Signal");
        out.field("id", &self.inner.node);
        match self.inner.value.try_borrow() {
            Ok(value) => out.field("value", &*value),
            Err(_) => out.field("value", &"<borrowed>"),
        };
        out.field("subscriber_count", &self.subscriber_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Runtime {
    /// Create a signal on this runtime.
    pub fn signal<T: SameValue + 'static>(&self, value: T) -> Signal<T> {
        Signal::create_in(self, value, EqualityPolicy::same_value())
    }

    pub fn signal_with<T: 'static>(&self, value: T, equals: EqualityPolicy<T>) -> Signal<T> {
        Signal::create_in(self, value, equals)
    }

    /// A signal nobody can write. Useful to hand constant inputs to code
    /// that expects a reactive value.
    pub fn read_only_signal<T: SameValue + 'static>(&self, value: T) -> ReadSignal<T> {
        self.signal(value).read_only()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
