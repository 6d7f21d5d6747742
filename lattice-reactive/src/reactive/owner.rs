//! Owners and Context
//!
//! An [`Owner`] is a disposal scope. Effects, nested scopes and plain
//! callbacks registered while an owner is current are torn down together
//! when it is disposed.
//!
//! # How Owners Work
//!
//! 1. [`root`] creates an owner under the current one and runs a closure
//!    with it installed. Disposing the parent disposes the child.
//!
//! 2. Every effect registers its own disposal with the owner that was
//!    current when it was created.
//!
//! 3. Disposal runs the registered cleanups newest first. Owners are
//!    single-use: once disposed, cleanups registered later run immediately.
//!
//! 4. A child holds its parent strongly; the parent only holds weak
//!    references to its children. A child disposed on its own, or dropped,
//!    removes its entry from the parent, so a long-lived owner does not
//!    accumulate entries for children that are already gone.
//!
//! # Context
//!
//! Each owner carries a small map from context identity to value. A lookup
//! walks from the current owner towards the root and falls back to the
//! context's default when no ancestor provides a value.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ReactiveError, Result};

use super::context::ReactiveContext;
use super::runtime::Runtime;

type OwnerCleanup = Box<dyn FnOnce()>;

/// A disposal scope.
#[derive(Clone)]
pub struct Owner {
    inner: Rc<OwnerInner>,
}

/// Position of a cleanup in its owner's disposal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct CleanupKey(u64);

struct OwnerInner {
    parent: Option<Owner>,
    /// Entry in the parent that disposes this owner with it.
    cascade: Cell<Option<CleanupKey>>,
    cleanups: RefCell<BTreeMap<CleanupKey, OwnerCleanup>>,
    next_cleanup: Cell<u64>,
    contexts: RefCell<HashMap<ContextId, Rc<dyn Any>>>,
    disposed: Cell<bool>,
}

impl Drop for OwnerInner {
    fn drop(&mut self) {
        if let (Some(parent), Some(key)) = (&self.parent, self.cascade.get()) {
            parent.forget(key);
        }
    }
}

/// Non-owning reference to an [`Owner`].
#[derive(Clone)]
pub struct WeakOwner {
    inner: Weak<OwnerInner>,
}

impl WeakOwner {
    pub fn upgrade(&self) -> Option<Owner> {
        self.inner.upgrade().map(|inner| Owner { inner })
    }
}

impl Owner {
    /// Create a detached owner with no parent.
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<Owner>) -> Self {
        Self {
            inner: Rc::new(OwnerInner {
                parent,
                cascade: Cell::new(None),
                cleanups: RefCell::new(BTreeMap::new()),
                next_cleanup: Cell::new(0),
                contexts: RefCell::new(HashMap::new()),
                disposed: Cell::new(false),
            }),
        }
    }

    /// The owner installed on the current runtime, if any.
    pub fn current() -> Option<Owner> {
        Runtime::current().owner()
    }

    /// Create an owner that inherits context from this one.
    ///
    /// The child keeps this owner alive but is not disposed with it;
    /// [`root`] adds that link.
    pub fn child(&self) -> Owner {
        Self::with_parent(Some(self.clone()))
    }

    pub fn parent(&self) -> Option<Owner> {
        self.inner.parent.clone()
    }

    pub fn downgrade(&self) -> WeakOwner {
        WeakOwner {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Register a callback to run when this owner is disposed.
    ///
    /// If the owner is already disposed, `f` runs immediately.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        self.register(f);
    }

    /// [`Owner::on_dispose`], returning a key that can withdraw the cleanup.
    /// `None` when the owner was already disposed and `f` has run.
    pub(crate) fn register(&self, f: impl FnOnce() + 'static) -> Option<CleanupKey> {
        if self.inner.disposed.get() {
            f();
            return None;
        }
        let key = CleanupKey(self.inner.next_cleanup.get());
        self.inner.next_cleanup.set(key.0 + 1);
        self.inner.cleanups.borrow_mut().insert(key, Box::new(f));
        Some(key)
    }

    /// Withdraw a cleanup without running it.
    pub(crate) fn forget(&self, key: CleanupKey) {
        let _removed = self.inner.cleanups.borrow_mut().remove(&key);
    }

    /// Run every registered cleanup, newest first. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        if let (Some(parent), Some(key)) = (&self.inner.parent, self.inner.cascade.take()) {
            parent.forget(key);
        }
        let cleanups = std::mem::take(&mut *self.inner.cleanups.borrow_mut());
        for (_, cleanup) in cleanups.into_iter().rev() {
            cleanup();
        }
        self.inner.contexts.borrow_mut().clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Number of cleanups waiting for disposal.
    pub fn cleanup_count(&self) -> usize {
        self.inner.cleanups.borrow().len()
    }

    /// Run `f` on `rt` with this owner current and tracking suspended.
    pub fn run_in<R>(&self, rt: &Runtime, f: impl FnOnce() -> R) -> R {
        let _runtime = rt.enter();
        let _ctx = ReactiveContext::owned(rt, self.clone());
        f()
    }

    /// A child of the owner current on `rt` that is disposed along with it,
    /// or a detached owner if none is current.
    pub(crate) fn nested(rt: &Runtime) -> Owner {
        match rt.owner() {
            Some(parent) => {
                let child = parent.child();
                let weak = child.downgrade();
                let key = parent.register(move || {
                    if let Some(child) = weak.upgrade() {
                        child.dispose();
                    }
                });
                child.inner.cascade.set(key);
                child
            }
            None => Owner::new(),
        }
    }

    pub fn ptr_eq(&self, other: &Owner) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn provide(&self, id: ContextId, value: Rc<dyn Any>) {
        self.inner.contexts.borrow_mut().insert(id, value);
    }

    fn lookup(&self, id: ContextId) -> Option<Rc<dyn Any>> {
        if let Some(value) = self.inner.contexts.borrow().get(&id) {
            return Some(Rc::clone(value));
        }
        self.parent()?.lookup(id)
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Owner")
            .field("disposed", &self.is_disposed())
            .field("cleanups", &self.cleanup_count())
            .field("contexts", &self.inner.contexts.borrow().len())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

/// Handle passed to the [`root`] closure; disposes the scope.
#[derive(Clone, Debug)]
pub struct Disposer {
    owner: Owner,
}

impl Disposer {
    pub fn dispose(&self) {
        self.owner.dispose();
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }
}

/// Run `f` inside a new disposal scope on the current runtime.
///
/// The scope is a child of the current owner, if there is one, and is
/// disposed along with it. Reads inside `f` are not tracked.
///
/// ```rust
/// use lattice_reactive::{root, Effect, Signal};
///
/// let count = Signal::new(0);
/// let (effect, disposer) = root(|disposer| {
///     let count = count.clone();
///     (Effect::new(move || { count.get(); }), disposer)
/// });
/// disposer.dispose();
/// assert!(effect.is_disposed());
/// ```
pub fn root<R>(f: impl FnOnce(Disposer) -> R) -> R {
    root_in(&Runtime::current(), f)
}

/// [`root`] on an explicit runtime.
pub fn root_in<R>(rt: &Runtime, f: impl FnOnce(Disposer) -> R) -> R {
    let owner = Owner::nested(rt);
    let disposer = Disposer {
        owner: owner.clone(),
    };
    owner.run_in(rt, || f(disposer))
}

/// Register a cleanup on the current owner.
pub fn on_dispose(f: impl FnOnce() + 'static) -> Result<()> {
    match Owner::current() {
        Some(owner) => {
            owner.on_dispose(f);
            Ok(())
        }
        None => Err(ReactiveError::NoOwner),
    }
}

// ----------------------------------------------------------------------------
// Context
// ----------------------------------------------------------------------------

static CONTEXT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

/// A typed context key with a default value.
pub struct Context<T: 'static> {
    id: ContextId,
    default: Rc<T>,
}

impl<T: 'static> Context<T> {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn default_value(&self) -> Rc<T> {
        Rc::clone(&self.default)
    }
}

impl<T: 'static> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: Rc::clone(&self.default),
        }
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("default", &self.default)
            .finish()
    }
}

/// Create a new context with a fallback value.
pub fn create_context<T: 'static>(default: T) -> Context<T> {
    Context {
        id: ContextId(CONTEXT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)),
        default: Rc::new(default),
    }
}

/// Provide `value` for `context` on the current owner.
pub fn provide_context<T: 'static>(context: &Context<T>, value: T) -> Result<()> {
    let owner = Owner::current().ok_or(ReactiveError::NoOwner)?;
    owner.provide(context.id, Rc::new(value));
    Ok(())
}

/// Look up the nearest provided value for `context`, or its default.
pub fn use_context<T: 'static>(context: &Context<T>) -> Rc<T> {
    Owner::current()
        .and_then(|owner| owner.lookup(context.id))
        .and_then(|value| value.downcast::<T>().ok())
        .unwrap_or_else(|| context.default_value())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
