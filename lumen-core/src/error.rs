//! Error types for the reactive engine.

use std::fmt;

use thiserror::Error;

use crate::reactive::EffectId;

/// What kind of handle an operation was attempted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Signal,
    Computed,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Signal => f.write_str("signal"),
            ResourceKind::Computed => f.write_str("computed"),
        }
    }
}

/// Errors surfaced by signals, computeds, effects and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A signal or computed was used after it was disposed.
    #[error("{kind} was used after it was disposed")]
    Disposed { kind: ResourceKind },

    /// The flush loop exceeded its round cap. The queue has been cleared.
    #[error("cyclic update: flush exceeded {rounds} rounds")]
    CyclicUpdate { rounds: usize },

    /// A computed was read re-entrantly before it ever produced a value.
    #[error("computed read itself before producing a value")]
    CyclicRead,

    /// An effect body panicked while running from the scheduler.
    #[error("effect {effect} panicked: {message}")]
    EffectPanicked { effect: EffectId, message: String },
}

impl ReactiveError {
    pub(crate) fn signal_disposed() -> Self {
        ReactiveError::Disposed {
            kind: ResourceKind::Signal,
        }
    }

    pub(crate) fn computed_disposed() -> Self {
        ReactiveError::Disposed {
            kind: ResourceKind::Computed,
        }
    }
}

/// Errors produced while loading a [`RuntimeConfig`](crate::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid runtime config: {field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposed_message_names_the_resource() {
        let err = ReactiveError::signal_disposed();
        assert_eq!(err.to_string(), "signal was used after it was disposed");

        let err = ReactiveError::computed_disposed();
        assert_eq!(err.to_string(), "computed was used after it was disposed");
    }

    #[test]
    fn cyclic_update_reports_round_cap() {
        let err = ReactiveError::CyclicUpdate { rounds: 10_000 };
        assert!(err.to_string().contains("10000"));
    }
}
