//! Lattice Reactive
//!
//! This crate provides the fine-grained reactive kernel of the Lattice UI
//! framework. It implements:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - A pooled dependency graph with two-phase (dirty / stale) invalidation
//! - Manual and automatic batching of effect runs
//! - Disposal scopes with inherited context
//! - A wrapper layer: plain-or-reactive values, per-path stores, async
//!   resources and keyed list reconciliation
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Node arena, link pool and scheduler queues
//! - `reactive`: Runtime, signals, computeds, effects and owners
//! - `value`, `store`, `resource`, `list`: The wrapper layer
//! - `config`, `error`: Runtime tunables and the error type
//!
//! # Example
//!
//! ```rust
//! use lattice_reactive::{flush, Computed, Effect, Signal};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Computed::new(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let seen = Rc::new(Cell::new(0));
//! let _effect = {
//!     let (doubled, seen) = (doubled.clone(), seen.clone());
//!     Effect::new(move || seen.set(doubled.get()))
//! };
//!
//! // Update the signal; the effect runs on the next flush
//! count.set(5);
//! flush().unwrap();
//! assert_eq!(seen.get(), 10);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod list;
pub mod reactive;
pub mod resource;
pub mod store;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result};
pub use list::{ListHost, ListMount, MappedList};
pub use reactive::{
    create_context, flush, on_cleanup, on_dispose, pending_effects, provide_context, root,
    root_in, sync, tokio_microtasks, tokio_tasks, untrack, use_context, Cleanup, Computed,
    ComputedState, Context, Disposer, Effect, EffectOutput, Owner, ReadSignal, Runtime, Signal,
    TaskSpawner, Trigger,
};
pub use resource::{Resource, ResourceStatus};
pub use store::{PathSegment, Store};
pub use value::{MaybeReactive, Reactive};

/// The names most code needs.
pub mod prelude {
    pub use crate::list::{ListHost, MappedList};
    pub use crate::reactive::{
        flush, on_cleanup, root, sync, untrack, Cleanup, Computed, Effect, Owner, Signal,
    };
    pub use crate::resource::{Resource, ResourceStatus};
    pub use crate::store::Store;
    pub use crate::value::{MaybeReactive, Reactive};
}
