//! Runtime Configuration
//!
//! Tunables for a [`Runtime`](crate::Runtime). Every field has a default, so
//! a partial JSON document is enough to override a single knob:
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "max_flush_rounds": 500 }"#)?;
//! let rt = Runtime::new(config);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Nodes allocated per pool growth step.
pub const DEFAULT_POOL_BATCH_SIZE: usize = 1_000;

/// Flush rounds allowed before an update is treated as cyclic.
pub const DEFAULT_MAX_FLUSH_ROUNDS: usize = 10_000;

/// Configuration for a reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many nodes the pool allocates when its free list runs dry.
    pub pool_batch_size: usize,

    /// Hard cap on flush rounds. Exceeding it aborts the flush with
    /// [`ReactiveError::CyclicUpdate`](crate::ReactiveError::CyclicUpdate).
    pub max_flush_rounds: usize,

    /// Emit a warning when an effect (or computed) tries to re-enter itself.
    pub report_cycles: bool,

    /// Warn about effect runs slower than this many milliseconds.
    pub slow_effect_threshold_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_batch_size: DEFAULT_POOL_BATCH_SIZE,
            max_flush_rounds: DEFAULT_MAX_FLUSH_ROUNDS,
            report_cycles: cfg!(debug_assertions),
            slow_effect_threshold_ms: if cfg!(debug_assertions) { Some(10) } else { None },
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_batch_size == 0 {
            return Err(ConfigError::Zero {
                field: "pool_batch_size",
            });
        }
        if self.max_flush_rounds == 0 {
            return Err(ConfigError::Zero {
                field: "max_flush_rounds",
            });
        }
        Ok(())
    }

    pub fn with_pool_batch_size(mut self, size: usize) -> Self {
        self.pool_batch_size = size;
        self
    }

    pub fn with_max_flush_rounds(mut self, rounds: usize) -> Self {
        self.max_flush_rounds = rounds;
        self
    }

    pub fn with_report_cycles(mut self, report: bool) -> Self {
        self.report_cycles = report;
        self
    }

    pub fn with_slow_effect_threshold_ms(mut self, threshold: Option<u64>) -> Self {
        self.slow_effect_threshold_ms = threshold;
        self
    }
}
