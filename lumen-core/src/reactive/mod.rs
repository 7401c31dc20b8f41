//! Reactive Primitives
//!
//! This module implements the user-facing reactive system: signals,
//! computeds, effects, batching and reactive objects.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while an effect runs, the effect is registered as a dependent. When the
//! value changes, every dependent is notified.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It recomputes only
//! when read after one of its dependencies changed, and it notifies its own
//! readers only when the result actually differs.
//!
//! ## Effects
//!
//! An Effect is a computation that re-runs when its dependencies change.
//! By default re-runs are queued and executed by the next flush, so several
//! writes in a row cost one run.
//!
//! # Implementation Notes
//!
//! Every primitive belongs to a [`Runtime`]. The free functions below use the
//! thread's current runtime; tests and embedders that need isolated graphs
//! create their own and call the `Runtime` methods directly.
//!
//! Dependency tracking is automatic: a read checks the runtime's
//! active-effect stack and, if an effect is running, records the node and
//! its version. Dirty checks compare versions instead of keeping dirty
//! flags, which is what lets a computed that came out unchanged leave its
//! readers alone.

mod batch;
mod computed;
mod context;
mod effect;
mod equality;
mod observer;
mod proxy;
mod runtime;
mod signal;
mod subscriber;

pub use batch::{Deferral, TokioLocalDeferral};
pub use computed::Computed;
pub use effect::{Effect, EffectOptions};
pub use equality::{EqualityPolicy, SameValue};
pub use observer::ReactiveObserver;
pub use proxy::{raw_object, Field, RawObject, ReactiveObject};
pub use runtime::{Runtime, RuntimeStats};
pub use signal::{ReadSignal, Signal};
pub use subscriber::{EffectId, Job, Scheduler, SubscriptionId};

use crate::error::Result;

/// Create a signal on the current runtime.
pub fn create_signal<T: SameValue + 'static>(value: T) -> Signal<T> {
    Runtime::current().signal(value)
}

/// Create a signal with a custom equality policy.
pub fn create_signal_with<T: 'static>(value: T, equals: EqualityPolicy<T>) -> Signal<T> {
    Runtime::current().signal_with(value, equals)
}

/// Create an effect on the current runtime and run it once.
pub fn create_effect<T, F>(f: F) -> Effect<T>
where
    T: 'static,
    F: FnMut() -> T + 'static,
{
    Runtime::current().effect(f)
}

pub fn create_effect_with<T, F>(f: F, options: EffectOptions) -> Effect<T>
where
    T: 'static,
    F: FnMut() -> T + 'static,
{
    Runtime::current().effect_with(f, options)
}

/// Create a lazy computed on the current runtime.
pub fn create_computed<T, F>(getter: F) -> Computed<T>
where
    T: SameValue + 'static,
    F: FnMut() -> T + 'static,
{
    Runtime::current().computed(getter)
}

pub fn create_computed_with<T, F>(getter: F, equals: EqualityPolicy<T>) -> Computed<T>
where
    T: 'static,
    F: FnMut() -> T + 'static,
{
    Runtime::current().computed_with(getter, equals)
}

/// Group writes on the current runtime. See [`Runtime::batch`].
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().batch(f)
}

/// Run every pending effect on the current runtime.
pub fn flush() -> Result<()> {
    Runtime::current().flush()
}

/// Run `f` without registering dependencies.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untrack(f)
}

/// Register a cleanup for the effect running on the current runtime. See
/// [`Runtime::on_cleanup`].
pub fn on_cleanup(f: impl FnOnce() + 'static) -> bool {
    Runtime::current().on_cleanup(f)
}

/// Wait until the current runtime has no pending work.
pub async fn wait_for_jobs() -> Result<()> {
    Runtime::current().wait_for_jobs().await
}

/// Wrap `raw` in a reactive proxy on the current runtime.
pub fn reactive(raw: RawObject) -> ReactiveObject {
    Runtime::current().reactive(raw)
}
