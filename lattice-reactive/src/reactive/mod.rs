//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds,
//! effects and the owners that scope them. These primitives form the
//! foundation of Lattice's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a computed or effect), the signal
//! automatically registers that context as a dependent. When the signal's
//! value changes, all dependents are invalidated.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies really changed, which it verifies lazily on
//! the next read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems, such as updating the DOM or logging.
//!
//! ## Owners
//!
//! An Owner is a disposal scope. Effects and nested scopes created under an
//! owner are disposed with it, and owners carry inherited context values.
//!
//! # Implementation Notes
//!
//! The reactive system uses ambient slots on the runtime to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! subscriber and, if so, connect the two in the graph.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod computed;
mod context;
mod effect;
mod owner;
mod runtime;
mod signal;
mod subscriber;

pub use computed::{Computed, ComputedState};
pub use effect::{on_cleanup, Cleanup, Effect, EffectOutput};
pub use owner::{
    create_context, on_dispose, provide_context, root, root_in, use_context, Context, ContextId,
    Disposer, Owner, WeakOwner,
};
pub use runtime::{
    flush, pending_effects, sync, tokio_microtasks, tokio_tasks, untrack, Runtime, RuntimeGuard,
    TaskSpawner,
};
pub use signal::{ReadSignal, Signal, Trigger};
