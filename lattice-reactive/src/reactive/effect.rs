//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued. It re-runs once per
//!    flush no matter how many of its dependencies changed.
//!
//! 3. Before re-running, the effect runs the previous run's cleanups (newest
//!    first), disposes anything created by the previous run, drops its old
//!    dependencies and tracks new ones during execution.
//!
//! 4. A write made by the effect to something it reads does not recurse. The
//!    effect is marked notified and queued for one follow-up run.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (compute on access); effects are eager (run when deps change).
//! - Computeds cache results; effects just run their side effect.
//!
//! # Failures
//!
//! A body that returns an error or panics never stops the scheduler. The
//! failure goes to the effect's handler, or to `tracing::error!` if it has
//! none.

use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::{NodeFlags, NodeKey, NodeKind};

use super::context::ReactiveContext;
use super::owner::{CleanupKey, Owner};
use super::runtime::Runtime;
use super::subscriber::{Execute, Subscriber};

/// A callback run before an effect's next run, or at its disposal.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    pub(crate) fn run(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cleanup")
    }
}

/// Values an effect body may return.
pub trait EffectOutput: 'static {
    /// Split into the next cleanup, or an error to report.
    fn into_outcome(self) -> Result<Option<Cleanup>>;
}

impl EffectOutput for () {
    fn into_outcome(self) -> Result<Option<Cleanup>> {
        Ok(None)
    }
}

impl EffectOutput for Cleanup {
    fn into_outcome(self) -> Result<Option<Cleanup>> {
        Ok(Some(self))
    }
}

impl<T: EffectOutput> EffectOutput for Option<T> {
    fn into_outcome(self) -> Result<Option<Cleanup>> {
        match self {
            Some(output) => output.into_outcome(),
            None => Ok(None),
        }
    }
}

impl<T, E> EffectOutput for std::result::Result<T, E>
where
    T: EffectOutput,
    E: Into<Box<dyn StdError + 'static>> + 'static,
{
    fn into_outcome(self) -> Result<Option<Cleanup>> {
        match self {
            Ok(output) => output.into_outcome(),
            Err(err) => Err(ReactiveError::effect(err)),
        }
    }
}

type Body = Box<dyn FnMut() -> Result<Option<Cleanup>>>;
type Handler = Box<dyn Fn(ReactiveError)>;

/// A side-effecting computation that runs when dependencies change.
///
/// The effect stays alive until it is disposed, either directly or by the
/// owner that was current when it was created. Dropping the handle does not
/// stop it.
///
/// # Example
///
/// ```rust
/// use lattice_reactive::{flush, Effect, Signal};
///
/// let count = Signal::new(0);
/// let effect = {
///     let count = count.clone();
///     Effect::new(move || println!("Count is: {}", count.get()))
/// };
///
/// count.set(5);
/// flush().unwrap(); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// effect.dispose();
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

struct EffectInner {
    rt: Runtime,
    key: NodeKey,
    body: RefCell<Body>,
    handler: Option<Handler>,
    cleanups: RefCell<Vec<Cleanup>>,
    parent: Option<Owner>,
    /// This effect's disposal entry in `parent`.
    registration: Cell<Option<CleanupKey>>,
    run_owner: RefCell<Option<Owner>>,
    runs: Cell<usize>,
    disposed: Cell<bool>,
}

impl EffectInner {
    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        for cleanup in cleanups.into_iter().rev() {
            cleanup.run();
        }
    }

    fn dispose_run_owner(&self) {
        let previous = self.run_owner.borrow_mut().take();
        if let Some(owner) = previous {
            owner.dispose();
        }
    }

    fn report(&self, err: ReactiveError) {
        match &self.handler {
            Some(handler) => handler(err),
            None => tracing::error!(key = ?self.key, error = %err, "unhandled effect error"),
        }
    }
}

impl Execute for EffectInner {
    fn execute(&self) {
        let rt = &self.rt;
        let _depth = match rt.enter_effect() {
            Ok(depth) => depth,
            Err(err) => {
                self.report(err);
                return;
            }
        };
        if !rt.begin_evaluation(self.key) {
            return;
        }

        self.run_cleanups();
        self.dispose_run_owner();
        let owner = match &self.parent {
            Some(parent) => parent.child(),
            None => Owner::new(),
        };
        *self.run_owner.borrow_mut() = Some(owner.clone());

        let outcome = {
            let _runtime = rt.enter();
            let _ctx = ReactiveContext::effect(rt, self.key, owner);
            let mut body = self.body.borrow_mut();
            catch_unwind(AssertUnwindSafe(|| (*body)()))
        };
        let notified = rt.end_evaluation(self.key);
        self.runs.set(self.runs.get() + 1);
        tracing::trace!(key = ?self.key, runs = self.runs.get(), "effect ran");

        match outcome {
            Ok(Ok(Some(cleanup))) => self.add_cleanup(cleanup),
            Ok(Ok(None)) => {}
            Ok(Err(err)) => self.report(err),
            Err(payload) => self.report(ReactiveError::from_panic(payload)),
        }

        if notified && !self.disposed.get() {
            rt.reschedule(self.key);
        }
    }

    fn add_cleanup(&self, cleanup: Cleanup) {
        if self.disposed.get() {
            cleanup.run();
        } else {
            self.cleanups.borrow_mut().push(cleanup);
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let (Some(parent), Some(key)) = (&self.parent, self.registration.take()) {
            parent.forget(key);
        }
        self.rt
            .update_flags(self.key, |flags| flags.insert(NodeFlags::DISPOSED));
        self.run_cleanups();
        self.dispose_run_owner();
        self.rt.remove_node(self.key);
        tracing::trace!(key = ?self.key, "effect disposed");
    }
}

impl Effect {
    /// Create a new effect on the current runtime.
    ///
    /// The function runs immediately to establish dependencies.
    pub fn new<F, O>(body: F) -> Self
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        Self::new_in(&Runtime::current(), body)
    }

    /// Create a new effect on `rt`.
    pub fn new_in<F, O>(rt: &Runtime, body: F) -> Self
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        Self::build(rt, body, None)
    }

    /// Create an effect whose errors and panics go to `handler`.
    pub fn with_handler<F, O, H>(body: F, handler: H) -> Self
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
        H: Fn(ReactiveError) + 'static,
    {
        Self::with_handler_in(&Runtime::current(), body, handler)
    }

    /// [`Effect::with_handler`] on an explicit runtime.
    pub fn with_handler_in<F, O, H>(rt: &Runtime, body: F, handler: H) -> Self
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
        H: Fn(ReactiveError) + 'static,
    {
        Self::build(rt, body, Some(Box::new(handler)))
    }

    fn build<F, O>(rt: &Runtime, mut body: F, handler: Option<Handler>) -> Self
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        let key = rt.register(NodeKind::Effect, None);
        let parent = rt.owner();
        let inner = Rc::new(EffectInner {
            rt: rt.clone(),
            key,
            body: RefCell::new(Box::new(move || body().into_outcome())),
            handler,
            cleanups: RefCell::new(Vec::new()),
            parent: parent.clone(),
            registration: Cell::new(None),
            run_owner: RefCell::new(None),
            runs: Cell::new(0),
            disposed: Cell::new(false),
        });
        rt.attach(key, Subscriber::Effect(inner.clone()));

        if let Some(owner) = parent {
            let weak = Rc::downgrade(&inner);
            let key = owner.register(move || {
                if let Some(effect) = weak.upgrade() {
                    effect.dispose();
                }
            });
            inner.registration.set(key);
        }

        rt.run_effect(key);
        Self { inner }
    }

    /// The node key of this effect.
    pub fn id(&self) -> NodeKey {
        self.inner.key
    }

    /// Dispose of the effect.
    ///
    /// Runs the pending cleanups and drops every dependency. After disposal,
    /// the effect will not run again.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.runs.get()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.rt.dependency_count(self.inner.key)
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.key)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Register a cleanup on the effect that is currently running.
///
/// Outside an effect body this logs a warning and returns
/// [`ReactiveError::CleanupOutsideEffect`].
pub fn on_cleanup(f: impl FnOnce() + 'static) -> Result<()> {
    let rt = Runtime::current();
    let effect = rt.running_effect().and_then(|key| match rt.subscriber(key) {
        Some(Subscriber::Effect(effect)) => Some(effect),
        _ => None,
    });
    match effect {
        Some(effect) => {
            effect.add_cleanup(Cleanup::new(f));
            Ok(())
        }
        None => {
            tracing::warn!("on_cleanup called outside of a running effect");
            Err(ReactiveError::CleanupOutsideEffect)
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
