//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds,
//! and effects. It owns the dependency graph, the global version clock and
//! the scheduler, and it implements the propagation and validation
//! algorithms.
//!
//! # How It Works
//!
//! 1. When a signal or computed is read while a subscriber is evaluating,
//!    the runtime connects the two in the graph.
//!
//! 2. When a signal's value changes, the runtime:
//!    a. Stamps the signal with a fresh clock value
//!    b. Marks direct computed subscribers dirty and transitive ones stale
//!    c. Queues every reached effect
//!    d. Computeds are lazy - they re-evaluate on next read
//!
//! 3. A stale computed compares each dependency's version against its own
//!    epoch (the clock value when it was last known valid). Only a real
//!    change upstream leads to a re-evaluation.
//!
//! # Threading
//!
//! A runtime is single-threaded. Each thread gets its own default runtime
//! through [`Runtime::current`]; hosts that want explicit control create a
//! runtime with [`Runtime::new`] and either build nodes against it
//! (`rt.signal(..)`) or install it with [`Runtime::enter`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use slotmap::SecondaryMap;

use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::graph::{Graph, Microtask, MicrotaskSpawner, NodeFlags, NodeKey, NodeKind, Scheduler};

use super::computed::Computed;
use super::context::ReactiveContext;
use super::effect::{Effect, EffectOutput};
use super::owner::Owner;
use super::signal::{Signal, Trigger};
use super::subscriber::Subscriber;

thread_local! {
    static CURRENT: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Handle to a reactive runtime. Cloning is cheap and shares the runtime.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(super) config: RuntimeConfig,
    pub(super) graph: RefCell<Graph>,
    pub(super) subscribers: RefCell<SecondaryMap<NodeKey, Subscriber>>,
    pub(super) clock: Cell<u64>,
    pub(super) observer: Cell<Option<NodeKey>>,
    pub(super) effect: Cell<Option<NodeKey>>,
    pub(super) owner: RefCell<Option<Owner>>,
    pub(super) scheduler: Scheduler,
    pub(super) effect_depth: Cell<u32>,
    pub(super) task_spawner: RefCell<Option<TaskSpawner>>,
}

/// Host hook that drives a background future to completion on the
/// runtime's thread.
pub type TaskSpawner = Rc<dyn Fn(LocalBoxFuture<'static, ()>)>;

/// Restores the previously current runtime when dropped.
pub struct RuntimeGuard {
    previous: Option<Runtime>,
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

impl Runtime {
    /// Create a new runtime.
    pub fn new(config: RuntimeConfig) -> Self {
        let graph = Graph::new(config.link_pool_capacity);
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                graph: RefCell::new(graph),
                subscribers: RefCell::new(SecondaryMap::new()),
                clock: Cell::new(0),
                observer: Cell::new(None),
                effect: Cell::new(None),
                owner: RefCell::new(None),
                scheduler: Scheduler::new(),
                effect_depth: Cell::new(0),
                task_spawner: RefCell::new(None),
            }),
        }
    }

    /// The runtime for the current thread, created on first use.
    pub fn current() -> Self {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(|| Runtime::new(RuntimeConfig::default()))
                .clone()
        })
    }

    /// Make this runtime the current one until the guard is dropped.
    pub fn enter(&self) -> RuntimeGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(self.clone()));
        RuntimeGuard { previous }
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Factories
    // ------------------------------------------------------------------

    /// Create a signal in this runtime.
    pub fn signal<T: PartialEq + 'static>(&self, value: T) -> Signal<T> {
        Signal::new_in(self, value)
    }

    /// Create a value-less trigger in this runtime.
    pub fn trigger(&self) -> Trigger {
        Trigger::new_in(self)
    }

    /// Create a computed in this runtime.
    pub fn computed<T, F>(&self, derive: F) -> Computed<T>
    where
        T: PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        Computed::new_in(self, derive)
    }

    /// Create an effect in this runtime. It runs once immediately.
    pub fn effect<F, O>(&self, body: F) -> Effect
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        Effect::new_in(self, body)
    }

    // ------------------------------------------------------------------
    // Node bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn register(&self, kind: NodeKind, subscriber: Option<Subscriber>) -> NodeKey {
        let key = self.inner.graph.borrow_mut().insert(kind);
        if let Some(subscriber) = subscriber {
            self.inner.subscribers.borrow_mut().insert(key, subscriber);
        }
        key
    }

    pub(crate) fn attach(&self, key: NodeKey, subscriber: Subscriber) {
        self.inner.subscribers.borrow_mut().insert(key, subscriber);
    }

    /// Remove a node and every edge touching it.
    ///
    /// Called from `Drop` impls, so it must tolerate a busy graph.
    pub(crate) fn remove_node(&self, key: NodeKey) {
        let subscriber = match self.inner.subscribers.try_borrow_mut() {
            Ok(mut table) => table.remove(key),
            Err(_) => None,
        };
        match self.inner.graph.try_borrow_mut() {
            Ok(mut graph) => {
                graph.remove(key);
            }
            Err(_) => tracing::warn!(?key, "graph busy while removing node; node leaked"),
        }
        // Dropped outside of any borrow: an effect's drop may touch the runtime.
        drop(subscriber);
    }

    pub(crate) fn subscriber(&self, key: NodeKey) -> Option<Subscriber> {
        self.inner.subscribers.borrow().get(key).cloned()
    }

    pub(crate) fn flags(&self, key: NodeKey) -> Option<NodeFlags> {
        self.inner.graph.borrow().node(key).map(|node| node.flags)
    }

    pub(crate) fn update_flags(&self, key: NodeKey, f: impl FnOnce(&mut NodeFlags)) {
        if let Some(node) = self.inner.graph.borrow_mut().node_mut(key) {
            f(&mut node.flags);
        }
    }

    pub(crate) fn version(&self, key: NodeKey) -> u64 {
        self.inner.graph.borrow().node(key).map_or(0, |node| node.version)
    }

    pub(crate) fn subscriber_count(&self, key: NodeKey) -> usize {
        self.inner.graph.borrow().subscribers(key).len()
    }

    pub(crate) fn dependency_count(&self, key: NodeKey) -> usize {
        self.inner.graph.borrow().dependencies(key).len()
    }

    /// Number of nodes alive in this runtime.
    pub fn node_count(&self) -> usize {
        self.inner.graph.borrow().node_count()
    }

    /// Number of live dependency edges.
    pub fn edge_count(&self) -> usize {
        self.inner.graph.borrow().links().live()
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Current value of the global version clock.
    pub fn clock(&self) -> u64 {
        self.inner.clock.get()
    }

    fn tick(&self) -> u64 {
        let next = self.inner.clock.get() + 1;
        self.inner.clock.set(next);
        next
    }

    /// Stamp `key` with a fresh clock value.
    pub(crate) fn stamp(&self, key: NodeKey) {
        let version = self.tick();
        if let Some(node) = self.inner.graph.borrow_mut().node_mut(key) {
            node.version = version;
        }
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    pub(crate) fn observer(&self) -> Option<NodeKey> {
        self.inner.observer.get()
    }

    pub(crate) fn running_effect(&self) -> Option<NodeKey> {
        self.inner.effect.get()
    }

    pub(crate) fn owner(&self) -> Option<Owner> {
        self.inner.owner.borrow().clone()
    }

    /// Record that the active subscriber, if any, read `dep`.
    pub(crate) fn track(&self, dep: NodeKey) {
        if let Some(sub) = self.inner.observer.get() {
            self.inner.graph.borrow_mut().connect(dep, sub);
        }
    }

    /// Run `f` without recording any dependency.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = ReactiveContext::untracked(self);
        f()
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// A source changed: stamp it and invalidate everything downstream.
    pub(crate) fn mark_changed(&self, source: NodeKey) {
        self.stamp(source);
        tracing::trace!(?source, version = self.clock(), "source changed");
        self.propagate(source, NodeFlags::DIRTY);
    }

    /// Flag the subscribers of `source` with `flag`.
    ///
    /// Computeds only get flags (recursing with `STALE` the first time they
    /// are invalidated); effects get queued.
    fn propagate(&self, source: NodeKey, flag: NodeFlags) {
        let subscribers = self.inner.graph.borrow().subscribers(source);
        for sub in subscribers {
            let (kind, was_valid) = {
                let mut graph = self.inner.graph.borrow_mut();
                let Some(node) = graph.node_mut(sub) else {
                    continue;
                };
                if node.flags.contains(NodeFlags::DISPOSED) {
                    continue;
                }
                let was_valid = node.is_clean();
                node.flags.insert(flag);
                (node.kind(), was_valid)
            };
            match kind {
                NodeKind::Derived => {
                    if was_valid {
                        self.propagate(sub, NodeFlags::STALE);
                    }
                }
                NodeKind::Effect => self.schedule_effect(sub),
                NodeKind::Source => debug_assert!(false, "source node {sub:?} subscribed to {source:?}"),
            }
        }
    }

    /// Queue an effect, or mark it notified if it is running right now.
    fn schedule_effect(&self, key: NodeKey) {
        let running = {
            let mut graph = self.inner.graph.borrow_mut();
            let Some(node) = graph.node_mut(key) else {
                return;
            };
            if node.flags.contains(NodeFlags::RUNNING) {
                node.flags.insert(NodeFlags::NOTIFIED);
                true
            } else {
                false
            }
        };
        if running {
            return;
        }

        let scheduler = &self.inner.scheduler;
        if scheduler.in_batch() {
            scheduler.enqueue_batch(key);
        } else {
            scheduler.enqueue_microtask(key);
            self.request_flush();
        }
    }

    /// Hand one deferred flush to the host spawner, unless there is no
    /// spawner or a flush is already on its way.
    fn request_flush(&self) {
        let Some(spawner) = self.inner.scheduler.claim_flush_request() else {
            return;
        };
        let weak = Rc::downgrade(&self.inner);
        spawner(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = (Runtime { inner }).flush() {
                    tracing::error!(error = %err, "deferred flush aborted");
                }
            }
        }));
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Bring a computed up to date.
    ///
    /// Clean: nothing to do. Stale only: verify dependencies and keep the
    /// cached value if none of them really changed. Dirty, or stale with a
    /// real upstream change: re-evaluate.
    pub(crate) fn refresh(&self, key: NodeKey) -> Result<()> {
        let Some(flags) = self.flags(key) else {
            return Ok(());
        };
        if flags.contains(NodeFlags::RUNNING) {
            return Err(ReactiveError::Cycle);
        }
        if !flags.intersects(NodeFlags::INVALID) {
            return Ok(());
        }
        if !flags.contains(NodeFlags::DIRTY) && !self.dependencies_changed(key)? {
            self.settle(key);
            return Ok(());
        }
        if let Some(Subscriber::Computed(weak)) = self.subscriber(key) {
            if let Some(node) = weak.upgrade() {
                node.recompute();
            }
        }
        Ok(())
    }

    /// Whether any dependency of `key` changed since `key`'s epoch.
    /// Stale computed dependencies are refreshed first.
    fn dependencies_changed(&self, key: NodeKey) -> Result<bool> {
        let (dependencies, epoch) = {
            let graph = self.inner.graph.borrow();
            let epoch = graph.node(key).map_or(0, |node| node.epoch);
            (graph.dependencies(key), epoch)
        };
        for dep in dependencies {
            let kind = self.inner.graph.borrow().node(dep).map(|node| node.kind());
            if kind == Some(NodeKind::Derived) {
                self.refresh(dep)?;
            }
            if self.version(dep) > epoch {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Mark a verified node clean as of now.
    fn settle(&self, key: NodeKey) {
        let clock = self.clock();
        if let Some(node) = self.inner.graph.borrow_mut().node_mut(key) {
            node.flags.remove(NodeFlags::STALE);
            node.epoch = clock;
        }
    }

    /// Start an evaluation: clear invalidation, mark running and drop the
    /// previous dependency set. Returns false for removed or disposed nodes.
    pub(crate) fn begin_evaluation(&self, key: NodeKey) -> bool {
        let mut graph = self.inner.graph.borrow_mut();
        let Some(node) = graph.node_mut(key) else {
            return false;
        };
        if node.flags.contains(NodeFlags::DISPOSED) {
            return false;
        }
        node.flags.remove(NodeFlags::INVALID | NodeFlags::NOTIFIED);
        node.flags.insert(NodeFlags::RUNNING);
        graph.disconnect_dependencies(key);
        true
    }

    /// Finish an evaluation. Returns whether the node was notified while
    /// running and owes a follow-up run.
    pub(crate) fn end_evaluation(&self, key: NodeKey) -> bool {
        let clock = self.clock();
        let mut graph = self.inner.graph.borrow_mut();
        let Some(node) = graph.node_mut(key) else {
            return false;
        };
        node.flags.remove(NodeFlags::RUNNING);
        node.epoch = clock;
        let notified = node.flags.contains(NodeFlags::NOTIFIED);
        node.flags.remove(NodeFlags::NOTIFIED);
        notified
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Run a queued effect if it still needs to run.
    pub(crate) fn run_effect(&self, key: NodeKey) {
        let Some(flags) = self.flags(key) else {
            return;
        };
        if flags.contains(NodeFlags::DISPOSED) {
            return;
        }
        if flags.contains(NodeFlags::RUNNING) {
            self.update_flags(key, |flags| flags.insert(NodeFlags::NOTIFIED));
            return;
        }
        if !flags.intersects(NodeFlags::INVALID) {
            return;
        }
        if !flags.contains(NodeFlags::DIRTY) {
            if let Ok(false) = self.dependencies_changed(key) {
                self.settle(key);
                return;
            }
        }
        if let Some(Subscriber::Effect(effect)) = self.subscriber(key) {
            effect.execute();
        }
    }

    /// Queue a follow-up run for an effect that was notified mid-run.
    pub(crate) fn reschedule(&self, key: NodeKey) {
        self.update_flags(key, |flags| flags.insert(NodeFlags::DIRTY));
        self.schedule_effect(key);
    }

    /// Count one level of effect nesting, failing past the configured limit.
    pub(crate) fn enter_effect(&self) -> Result<EffectDepth<'_>> {
        let depth = self.inner.effect_depth.get() + 1;
        let limit = self.inner.config.max_effect_depth;
        if self.inner.config.guards_enabled() && depth > limit {
            tracing::error!(depth, limit, "effect depth guard tripped");
            return Err(ReactiveError::DepthExceeded { limit });
        }
        self.inner.effect_depth.set(depth);
        Ok(EffectDepth { rt: self })
    }

    // ------------------------------------------------------------------
    // Batching and flushing
    // ------------------------------------------------------------------

    /// Run `f` as one batch: effects triggered inside run once, after the
    /// outermost batch closes, followed by a full flush.
    pub fn sync<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.scheduler.begin_batch();
        let batch = Batch { rt: self, closed: false };
        let result = f();
        batch.close();
        result
    }

    /// Run everything outstanding: the batch queue, then the microtask
    /// queue until it stays empty.
    pub fn flush(&self) -> Result<()> {
        let scheduler = &self.inner.scheduler;
        for key in scheduler.take_batch() {
            self.run_effect(key);
        }

        let limit = self.inner.config.max_flush_iterations;
        let mut passes = 0u32;
        scheduler.hold_flush_request();
        loop {
            let queued = scheduler.take_microtasks();
            if queued.is_empty() {
                scheduler.clear_flush_request();
                return Ok(());
            }
            passes += 1;
            if self.inner.config.guards_enabled() && passes > limit {
                scheduler.clear();
                tracing::error!(limit, "flush iteration guard tripped");
                return Err(ReactiveError::FlushLimit { limit });
            }
            tracing::debug!(pass = passes, count = queued.len(), "flushing effects");
            for key in queued {
                self.run_effect(key);
            }
        }
    }

    /// Number of effects waiting to run.
    pub fn pending_effects(&self) -> usize {
        self.inner.scheduler.pending()
    }

    /// Install the host hook used to defer automatic flushes.
    ///
    /// Without a spawner, effects queued outside a batch wait for the next
    /// [`flush`](Runtime::flush) or [`sync`](Runtime::sync).
    ///
    /// Effects already queued when a spawner is installed get their flush
    /// requested right away.
    pub fn set_microtask_spawner(&self, spawner: Option<MicrotaskSpawner>) {
        self.inner.scheduler.set_spawner(spawner);
        self.request_flush();
    }

    /// Install the host hook that drives background futures, such as
    /// pending resource fetches.
    pub fn set_task_spawner(&self, spawner: Option<TaskSpawner>) {
        *self.inner.task_spawner.borrow_mut() = spawner;
    }

    /// Hand `task` to the task spawner.
    pub(crate) fn spawn_task(&self, task: LocalBoxFuture<'static, ()>) -> Result<()> {
        let spawner = self.inner.task_spawner.borrow().clone();
        match spawner {
            Some(spawner) => {
                spawner(task);
                Ok(())
            }
            None => Err(ReactiveError::NoTaskSpawner),
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("clock", &self.clock())
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

/// One level of effect nesting.
pub(crate) struct EffectDepth<'a> {
    rt: &'a Runtime,
}

impl Drop for EffectDepth<'_> {
    fn drop(&mut self) {
        let depth = &self.rt.inner.effect_depth;
        depth.set(depth.get().saturating_sub(1));
    }
}

/// An open manual batch.
struct Batch<'a> {
    rt: &'a Runtime,
    closed: bool,
}

impl Batch<'_> {
    fn close(mut self) {
        self.closed = true;
        if !self.rt.inner.scheduler.end_batch() {
            return;
        }
        tracing::debug!("batch closed");
        if let Err(err) = self.rt.flush() {
            tracing::error!(error = %err, "flush after batch aborted");
        }
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // The batch body unwound: hand its queue to the next flush.
        let scheduler = &self.rt.inner.scheduler;
        if scheduler.end_batch() {
            scheduler.defer_batch();
            self.rt.request_flush();
        }
    }
}

// ----------------------------------------------------------------------------
// Free functions on the current runtime
// ----------------------------------------------------------------------------

/// Batch the writes in `f` on the current runtime; see [`Runtime::sync`].
pub fn sync<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().sync(f)
}

/// Flush all outstanding work on the current runtime; see [`Runtime::flush`].
pub fn flush() -> Result<()> {
    Runtime::current().flush()
}

/// Run `f` without tracking on the current runtime.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untrack(f)
}

/// Number of effects waiting to run on the current runtime.
pub fn pending_effects() -> usize {
    Runtime::current().pending_effects()
}

/// A microtask spawner backed by `tokio::task::spawn_local`.
///
/// Flushes requested through it run on the current `LocalSet`, after the
/// task that triggered them yields.
pub fn tokio_microtasks() -> MicrotaskSpawner {
    Rc::new(|task: Microtask| {
        tokio::task::spawn_local(async move { task() });
    })
}

/// A task spawner backed by `tokio::task::spawn_local`. Install it on a
/// runtime used inside a `LocalSet`.
pub fn tokio_tasks() -> TaskSpawner {
    Rc::new(|task: LocalBoxFuture<'static, ()>| {
        tokio::task::spawn_local(task);
    })
}
