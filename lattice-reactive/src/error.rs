//! Error Types
//!
//! Every fallible operation in the kernel reports a [`ReactiveError`].
//! Effect failures are never propagated to the writer that triggered the
//! effect; they are routed to the effect's handler or logged.

use std::error::Error as StdError;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors raised by the reactive kernel.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// `on_cleanup` was called while no effect body was executing.
    #[error("on_cleanup called outside of a running effect")]
    CleanupOutsideEffect,

    /// An owner-scoped operation was attempted with no current owner.
    #[error("no reactive owner is active on this thread")]
    NoOwner,

    /// A computed read itself while evaluating.
    #[error("cycle detected: computed value read during its own evaluation")]
    Cycle,

    /// Effects kept triggering each other synchronously.
    #[error("effect execution depth exceeded {limit}; effects are recursively triggering each other")]
    DepthExceeded {
        /// The configured limit.
        limit: u32,
    },

    /// A flush kept re-queueing effects.
    #[error("flush exceeded {limit} iterations; an effect keeps re-triggering itself")]
    FlushLimit {
        /// The configured limit.
        limit: u32,
    },

    /// A background future was started on a runtime with no task spawner.
    #[error("no task spawner is installed on this runtime")]
    NoTaskSpawner,

    /// An effect body panicked.
    #[error("effect panicked: {0}")]
    EffectPanicked(String),

    /// An effect body returned an error.
    #[error("effect failed: {0}")]
    Effect(#[source] Box<dyn StdError + 'static>),

    /// A store value could not be converted to or from the requested type.
    #[error("store conversion failed: {0}")]
    Store(#[source] serde_json::Error),

    /// A runtime configuration document could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(#[source] serde_json::Error),
}

impl ReactiveError {
    /// Wrap an arbitrary error returned by an effect body.
    pub fn effect<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + 'static>>,
    {
        Self::Effect(error.into())
    }

    /// Build an error from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::EffectPanicked(message)
    }
}
