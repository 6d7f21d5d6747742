//! Runtime Configuration
//!
//! Tunables for a [`Runtime`](crate::reactive::Runtime). The defaults are
//! suitable for UI workloads; hosts can override them in code or load them
//! from a JSON document.
//!
//! ```rust
//! use lattice_reactive::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_json(r#"{ "max_flush_iterations": 50 }"#).unwrap();
//! assert_eq!(config.max_flush_iterations, 50);
//! assert_eq!(config.max_effect_depth, RuntimeConfig::default().max_effect_depth);
//! ```

use serde::Deserialize;

use crate::error::{ReactiveError, Result};

/// Configuration for a reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum nesting of effect runs before the depth guard trips.
    pub max_effect_depth: u32,

    /// Maximum number of drain passes in one flush before the flush guard trips.
    pub max_flush_iterations: u32,

    /// Number of free link slots the graph keeps before compacting its link pool.
    pub link_pool_capacity: usize,

    /// Enables the depth and flush-iteration guards.
    ///
    /// Has no effect in builds without debug assertions.
    pub dev_guards: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_effect_depth: 100,
            max_flush_iterations: 100,
            link_pool_capacity: 1024,
            dev_guards: cfg!(debug_assertions),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(ReactiveError::Config)
    }

    /// Set the effect depth limit.
    pub fn with_max_effect_depth(mut self, limit: u32) -> Self {
        self.max_effect_depth = limit;
        self
    }

    /// Set the flush iteration limit.
    pub fn with_max_flush_iterations(mut self, limit: u32) -> Self {
        self.max_flush_iterations = limit;
        self
    }

    /// Set the retained link pool capacity.
    pub fn with_link_pool_capacity(mut self, capacity: usize) -> Self {
        self.link_pool_capacity = capacity;
        self
    }

    /// Enable or disable the development guards.
    pub fn with_dev_guards(mut self, enabled: bool) -> Self {
        self.dev_guards = enabled;
        self
    }

    /// Whether guards are active for this build.
    pub(crate) fn guards_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.dev_guards
    }
}
