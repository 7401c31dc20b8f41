//! Lumen Core
//!
//! This crate provides a fine-grained reactive state engine. It implements:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - Automatic, versioned dependency tracking
//! - A batching scheduler with a bounded flush loop
//! - Reactive proxies over JSON objects
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: pooled node storage, intrusive observer lists and the job queue
//! - `reactive`: the primitives, the runtime that connects them, and batching
//! - `config`: runtime tuning, loadable from JSON
//! - `error`: error types
//!
//! # Example
//!
//! ```rust,ignore
//! use lumen_core::{create_computed, create_effect, create_signal, flush};
//!
//! // Create a signal
//! let count = create_signal(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = create_computed(move || c.get() * 2);
//!
//! // Create an effect
//! let (c, d) = (count.clone(), doubled.clone());
//! create_effect(move || {
//!     println!("Count: {}, Doubled: {}", c.get(), d.get());
//! });
//!
//! // Update the signal, then run queued effects
//! count.set(5);
//! flush()?;
//! // Prints: "Count: 5, Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{ConfigError, ReactiveError, ResourceKind, Result};
pub use reactive::{
    batch, create_computed, create_computed_with, create_effect, create_effect_with,
    create_signal, create_signal_with, flush, on_cleanup, raw_object, reactive, untrack,
    wait_for_jobs, Computed, Deferral, Effect, EffectId, EffectOptions, EqualityPolicy, Field,
    Job, RawObject, ReactiveObject, ReactiveObserver, ReadSignal, Runtime, RuntimeStats,
    Scheduler, SameValue, Signal, SubscriptionId, TokioLocalDeferral,
};
