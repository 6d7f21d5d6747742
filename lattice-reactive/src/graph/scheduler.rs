//! Update Scheduler
//!
//! The scheduler holds effect nodes that are waiting to run. It has two
//! queues:
//!
//! 1. The **batch queue**, filled while a manual batch (`sync`) is open and
//!    drained once when the outermost batch closes.
//! 2. The **microtask queue**, filled by writes outside any batch. The
//!    first enqueue after a flush requests exactly one deferred flush from
//!    the host spawner; later enqueues in the same tick ride along. Without
//!    a spawner nothing is requested and the queue waits for a manual flush.
//!
//! Both queues are insertion-ordered sets, so a node queued many times in
//! one cycle runs once, in the order it was first queued. Order follows
//! each observable's subscriber registration order; diamond correctness
//! comes from epoch validation, not from a topological sort.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::node::NodeKey;

/// Deferred flush handed to the host's microtask spawner.
pub type Microtask = Box<dyn FnOnce()>;

/// Host hook that runs a [`Microtask`] once the current call stack unwinds.
pub type MicrotaskSpawner = Rc<dyn Fn(Microtask)>;

/// Effect queues for one runtime.
#[derive(Default)]
pub struct Scheduler {
    batch_depth: Cell<u32>,
    batch_queue: RefCell<IndexSet<NodeKey>>,
    microtasks: RefCell<IndexSet<NodeKey>>,
    flush_scheduled: Cell<bool>,
    spawner: RefCell<Option<MicrotaskSpawner>>,
}

impl Scheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a manual batch.
    pub fn begin_batch(&self) {
        self.batch_depth.set(self.batch_depth.get() + 1);
    }

    /// Close a manual batch. Returns true when the outermost batch closed.
    pub fn end_batch(&self) -> bool {
        let depth = self.batch_depth.get();
        debug_assert!(depth > 0, "end_batch without begin_batch");
        let depth = depth.saturating_sub(1);
        self.batch_depth.set(depth);
        depth == 0
    }

    /// Whether a manual batch is open.
    pub fn in_batch(&self) -> bool {
        self.batch_depth.get() > 0
    }

    /// Queue a node for the end of the current batch.
    pub fn enqueue_batch(&self, key: NodeKey) {
        self.batch_queue.borrow_mut().insert(key);
    }

    /// Queue a node for the next microtask flush.
    pub fn enqueue_microtask(&self, key: NodeKey) {
        self.microtasks.borrow_mut().insert(key);
    }

    /// The spawner to hand a deferred flush to, if one is installed and no
    /// flush has been requested yet. Marks the request as made.
    pub fn claim_flush_request(&self) -> Option<MicrotaskSpawner> {
        if self.flush_scheduled.get() || self.microtasks.borrow().is_empty() {
            return None;
        }
        let spawner = self.spawner()?;
        self.flush_scheduled.set(true);
        Some(spawner)
    }

    /// Take everything queued for the batch.
    pub fn take_batch(&self) -> SmallVec<[NodeKey; 16]> {
        self.batch_queue.borrow_mut().drain(..).collect()
    }

    /// Take everything queued for the microtask flush.
    pub fn take_microtasks(&self) -> SmallVec<[NodeKey; 16]> {
        self.microtasks.borrow_mut().drain(..).collect()
    }

    /// Move leftover batch entries onto the microtask queue.
    pub fn defer_batch(&self) {
        let leftover = self.take_batch();
        self.microtasks.borrow_mut().extend(leftover);
    }

    /// Mark a flush as in progress so enqueues made by running effects join
    /// it instead of requesting another one.
    pub fn hold_flush_request(&self) {
        self.flush_scheduled.set(true);
    }

    /// Forget the pending flush request; called when a flush finishes.
    pub fn clear_flush_request(&self) {
        self.flush_scheduled.set(false);
    }

    /// Drop everything queued. Used when a guard trips.
    pub fn clear(&self) {
        self.batch_queue.borrow_mut().clear();
        self.microtasks.borrow_mut().clear();
        self.flush_scheduled.set(false);
    }

    /// Number of queued nodes across both queues.
    pub fn pending(&self) -> usize {
        self.batch_queue.borrow().len() + self.microtasks.borrow().len()
    }

    /// Whether a flush has been requested and not yet started.
    pub fn is_flush_scheduled(&self) -> bool {
        self.flush_scheduled.get()
    }

    /// Install or remove the host spawner.
    pub fn set_spawner(&self, spawner: Option<MicrotaskSpawner>) {
        *self.spawner.borrow_mut() = spawner;
    }

    /// The host spawner, if any.
    pub fn spawner(&self) -> Option<MicrotaskSpawner> {
        self.spawner.borrow().clone()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("batch_depth", &self.batch_depth.get())
            .field("pending", &self.pending())
            .field("flush_scheduled", &self.flush_scheduled.get())
            .field("has_spawner", &self.spawner.borrow().is_some())
            .finish()
    }
}
