//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies really change.
//!
//! # How Computeds Work
//!
//! 1. Nothing runs at creation. On first access, the computed runs its
//!    derivation and caches the result.
//!
//! 2. When a source it reads directly changes, the computed is marked
//!    `Dirty`. When something further upstream changes, it is marked
//!    `Stale`: an input *might* have changed.
//!
//! 3. On the next access a stale computed compares each dependency's version
//!    against its own epoch. If nothing is newer, it settles and returns the
//!    cache without running the derivation.
//!
//! 4. A re-evaluation that produces an equal value keeps the old version, so
//!    computeds further downstream also settle without work.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 computeds depend on it
//! - Only the computeds actually read will recompute
//! - In a diamond, the bottom node recomputes once, not once per path

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::graph::{NodeFlags, NodeKey, NodeKind};

use super::context::{EvaluationGuard, ReactiveContext};
use super::runtime::Runtime;
use super::subscriber::{Recompute, Subscriber};

/// Validation state of a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up-to-date.
    Clean,

    /// Something upstream changed. Need to verify.
    Stale,

    /// A direct dependency changed; the computed must re-evaluate.
    Dirty,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The equality function (by default `PartialEq`) decides whether a
/// re-evaluation produced a new value; an equal result does not wake
/// anything downstream.
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

struct ComputedInner<T: 'static> {
    rt: Runtime,
    key: NodeKey,
    derive: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
    equals: fn(&T, &T) -> bool,
}

impl<T: 'static> Recompute for ComputedInner<T> {
    fn recompute(&self) {
        let rt = &self.rt;
        if !rt.begin_evaluation(self.key) {
            return;
        }
        let mut guard = EvaluationGuard::new(rt, self.key);
        let next = {
            let _ctx = ReactiveContext::evaluate(rt, self.key, None);
            (self.derive)()
        };
        guard.disarm();

        let changed = {
            let mut value = self.value.borrow_mut();
            match value.as_ref() {
                Some(current) if (self.equals)(current, &next) => false,
                _ => {
                    *value = Some(next);
                    true
                }
            }
        };
        if changed {
            rt.stamp(self.key);
        }
        rt.end_evaluation(self.key);
        tracing::trace!(key = ?self.key, changed, "computed re-evaluated");
    }
}

impl<T: 'static> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.rt.remove_node(self.key);
    }
}

impl<T: PartialEq + 'static> Computed<T> {
    /// Create a new computed on the current runtime.
    pub fn new<F>(derive: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::new_in(&Runtime::current(), derive)
    }

    /// Create a new computed on `rt`.
    pub fn new_in<F>(rt: &Runtime, derive: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::with_equals_in(rt, derive, <T as PartialEq>::eq)
    }
}

impl<T: 'static> Computed<T> {
    /// Create a computed that uses `equals` to detect real changes.
    pub fn with_equals<F>(derive: F, equals: fn(&T, &T) -> bool) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::with_equals_in(&Runtime::current(), derive, equals)
    }

    /// [`Computed::with_equals`] on an explicit runtime.
    pub fn with_equals_in<F>(rt: &Runtime, derive: F, equals: fn(&T, &T) -> bool) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let weak: Weak<dyn Recompute> = weak.clone();
            let key = rt.register(NodeKind::Derived, Some(Subscriber::Computed(weak)));
            ComputedInner {
                rt: rt.clone(),
                key,
                derive: Box::new(derive),
                value: RefCell::new(None),
                equals,
            }
        });
        Self { inner }
    }

    /// The node key of this computed.
    pub fn id(&self) -> NodeKey {
        self.inner.key
    }

    /// The runtime this computed belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.rt
    }

    /// Get the current value, re-evaluating if needed.
    ///
    /// # Panics
    ///
    /// Panics if the computed is read during its own evaluation.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Like [`get`](Computed::get), but reports a cycle as an error.
    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Borrow the current value, re-evaluating if needed.
    ///
    /// # Panics
    ///
    /// Panics if the computed is read during its own evaluation.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }

    /// Borrow the current value, reporting a cycle as an error.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.inner.rt.refresh(self.inner.key)?;
        self.inner.rt.track(self.inner.key);
        Ok(self.read(f))
    }

    /// Get the current value without tracking, re-evaluating if needed.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.peek_with(T::clone)
    }

    /// Borrow the current value without tracking.
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Err(err) = self.inner.rt.refresh(self.inner.key) {
            panic!("{err}");
        }
        self.read(f)
    }

    fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.inner.value.borrow();
        f(value.as_ref().expect("computed has no value after refresh"))
    }

    /// Get the current validation state.
    pub fn state(&self) -> ComputedState {
        match self.inner.rt.flags(self.inner.key) {
            Some(flags) if flags.contains(NodeFlags::DIRTY) => ComputedState::Dirty,
            Some(flags) if flags.contains(NodeFlags::STALE) => ComputedState::Stale,
            _ => ComputedState::Clean,
        }
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// The clock value of the last real change.
    pub fn version(&self) -> u64 {
        self.inner.rt.version(self.inner.key)
    }

    /// Number of subscribers reading this computed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.rt.subscriber_count(self.inner.key)
    }

    /// Number of dependencies read by the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.rt.dependency_count(self.inner.key)
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.key)
            .field("state", &self.state())
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
