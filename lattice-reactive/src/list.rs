//! Keyed List Rendering
//!
//! A [`MappedList`] describes how to turn a reactive sequence into output
//! nodes: a source, a key extractor and a mapping function. Building one
//! does nothing. A collaborator that owns the output (a renderer, a test
//! double) calls [`MappedList::mount`] with a [`ListHost`], and from then on
//! the host's children track the source.
//!
//! # How Reconciliation Works
//!
//! The mount keeps a cache from key to entry. Each entry owns its output
//! node, a cell with the current item, a cell with the current index and an
//! [`Owner`] that scopes everything the mapping function created.
//!
//! When the source changes:
//!
//! 1. Entries whose key vanished are removed from the host and disposed.
//! 2. The new sequence is walked in order against the old one. An entry
//!    that already sits in the expected slot stays where it is; one that
//!    does not is moved in front of the node occupying that slot; a new key
//!    is mapped and inserted there.
//! 3. Kept entries get their item and index cells updated. Equal writes are
//!    no-ops, so an entry that did not move or change wakes nothing.
//!
//! Appending or removing costs one host operation per affected item, and a
//! reorder costs one move per displaced item. The mapping function never
//! runs again for a key it has already seen.

use std::cell::{Ref, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::reactive::{Effect, Owner, Runtime, Signal};

/// The output side of a mounted list.
///
/// The host holds exactly the nodes of the list, in order.
pub trait ListHost {
    type Node: Clone + 'static;

    /// Insert `node` before `anchor`, or at the end when `anchor` is `None`.
    /// If `node` is already in the host, move it.
    fn insert_before(&mut self, node: &Self::Node, anchor: Option<&Self::Node>);

    /// Remove `node` from the host.
    fn remove(&mut self, node: &Self::Node);
}

type Source<T> = Rc<dyn Fn() -> Vec<T>>;
type KeyFn<T, K> = Rc<dyn Fn(usize, &T) -> K>;
type MapFn<T, N> = Rc<dyn Fn(Signal<T>, Signal<usize>) -> N>;

/// A lazy description of a mapped, keyed list.
pub struct MappedList<T: 'static, K: 'static, N: 'static> {
    rt: Runtime,
    source: Source<T>,
    key: KeyFn<T, K>,
    map: MapFn<T, N>,
}

impl<T, N> MappedList<T, usize, N>
where
    T: Clone + PartialEq + 'static,
    N: 'static,
{
    /// Map a list keyed by position.
    ///
    /// Entries are reused by index, so a change to an item updates its item
    /// cell in place instead of creating a new node.
    pub fn new(
        source: impl Fn() -> Vec<T> + 'static,
        map: impl Fn(Signal<T>, Signal<usize>) -> N + 'static,
    ) -> Self {
        Self::new_in(&Runtime::current(), source, map)
    }

    /// [`MappedList::new`] on an explicit runtime.
    pub fn new_in(
        rt: &Runtime,
        source: impl Fn() -> Vec<T> + 'static,
        map: impl Fn(Signal<T>, Signal<usize>) -> N + 'static,
    ) -> Self {
        Self {
            rt: rt.clone(),
            source: Rc::new(source),
            key: Rc::new(|index: usize, _: &T| index),
            map: Rc::new(map),
        }
    }
}

impl<T, K, N> MappedList<T, K, N>
where
    T: Clone + PartialEq + 'static,
    K: Clone + Eq + Hash + 'static,
    N: 'static,
{
    /// Map a list keyed by `key`.
    ///
    /// An item keeps its node for as long as its key stays in the list,
    /// wherever it moves.
    pub fn keyed(
        source: impl Fn() -> Vec<T> + 'static,
        key: impl Fn(&T) -> K + 'static,
        map: impl Fn(Signal<T>, Signal<usize>) -> N + 'static,
    ) -> Self {
        Self::keyed_in(&Runtime::current(), source, key, map)
    }

    /// [`MappedList::keyed`] on an explicit runtime.
    pub fn keyed_in(
        rt: &Runtime,
        source: impl Fn() -> Vec<T> + 'static,
        key: impl Fn(&T) -> K + 'static,
        map: impl Fn(Signal<T>, Signal<usize>) -> N + 'static,
    ) -> Self {
        Self {
            rt: rt.clone(),
            source: Rc::new(source),
            key: Rc::new(move |_: usize, item: &T| key(item)),
            map: Rc::new(map),
        }
    }

    /// Start rendering into `host`.
    ///
    /// The mount lives until [`ListMount::unmount`] is called or the owner
    /// current at mount time is disposed.
    pub fn mount<H>(&self, host: H) -> ListMount<T, K, H>
    where
        H: ListHost<Node = N> + 'static,
    {
        let rt = &self.rt;
        let owner = Owner::nested(rt);
        let state = Rc::new(MountState {
            list: self.clone(),
            host: RefCell::new(host),
            owner: owner.clone(),
            entries: RefCell::new(IndexMap::new()),
        });

        owner.run_in(rt, || {
            let mounted = Rc::clone(&state);
            Effect::new_in(rt, move || {
                let items = (mounted.list.source)();
                mounted.list.rt.untrack(|| mounted.reconcile(items));
            });
        });

        // Registered after the effect so it runs first on disposal.
        let weak = Rc::downgrade(&state);
        owner.on_dispose(move || {
            if let Some(state) = weak.upgrade() {
                state.clear();
            }
        });

        ListMount { state }
    }
}

impl<T: 'static, K: 'static, N: 'static> Clone for MappedList<T, K, N> {
    fn clone(&self) -> Self {
        Self {
            rt: self.rt.clone(),
            source: Rc::clone(&self.source),
            key: Rc::clone(&self.key),
            map: Rc::clone(&self.map),
        }
    }
}

impl<T: 'static, K: 'static, N: 'static> fmt::Debug for MappedList<T, K, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedList").finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Mounting
// ----------------------------------------------------------------------------

struct Entry<T: 'static, N> {
    node: N,
    item: Signal<T>,
    index: Signal<usize>,
    owner: Owner,
}

struct MountState<T: 'static, K: 'static, H: ListHost + 'static> {
    list: MappedList<T, K, H::Node>,
    host: RefCell<H>,
    owner: Owner,
    entries: RefCell<IndexMap<K, Entry<T, H::Node>>>,
}

impl<T, K, H> MountState<T, K, H>
where
    T: Clone + PartialEq + 'static,
    K: Clone + Eq + Hash + 'static,
    H: ListHost + 'static,
{
    fn reconcile(&self, items: Vec<T>) {
        let rt = &self.list.rt;

        let mut next: IndexMap<K, T> = IndexMap::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let key = (self.list.key)(index, &item);
            if next.contains_key(&key) {
                tracing::warn!(index, "duplicate key in mapped list; item skipped");
                continue;
            }
            next.insert(key, item);
        }

        // Callbacks below may run user code; no borrow of the cache is held.
        let mut old = std::mem::take(&mut *self.entries.borrow_mut());
        let mut removed = 0usize;
        old.retain(|key, entry| {
            if next.contains_key(key) {
                return true;
            }
            self.host.borrow_mut().remove(&entry.node);
            entry.owner.dispose();
            removed += 1;
            false
        });

        let slots: Vec<K> = old.keys().cloned().collect();
        let mut cursor = 0;
        let mut placed: HashSet<K> = HashSet::with_capacity(slots.len());
        let mut fresh: IndexMap<K, Entry<T, H::Node>> = IndexMap::with_capacity(next.len());
        let (mut created, mut moved) = (0usize, 0usize);

        for (position, (key, item)) in next.into_iter().enumerate() {
            while cursor < slots.len() && placed.contains(&slots[cursor]) {
                cursor += 1;
            }
            let expected = slots.get(cursor);
            let anchor = expected.and_then(|slot| old.get(slot)).map(|entry| entry.node.clone());

            let entry = match old.swap_remove(&key) {
                Some(entry) => {
                    if expected == Some(&key) {
                        cursor += 1;
                    } else {
                        self.host.borrow_mut().insert_before(&entry.node, anchor.as_ref());
                        moved += 1;
                    }
                    entry.item.set(item);
                    entry.index.set(position);
                    placed.insert(key.clone());
                    entry
                }
                None => {
                    let entry = self.create(rt, item, position);
                    self.host.borrow_mut().insert_before(&entry.node, anchor.as_ref());
                    created += 1;
                    entry
                }
            };
            fresh.insert(key, entry);
        }

        tracing::trace!(
            len = fresh.len(),
            created,
            moved,
            removed,
            "list reconciled"
        );
        *self.entries.borrow_mut() = fresh;
    }

    fn create(&self, rt: &Runtime, item: T, position: usize) -> Entry<T, H::Node> {
        let owner = self.owner.child();
        let item = Signal::new_in(rt, item);
        let index = Signal::new_in(rt, position);
        let node = owner.run_in(rt, || (self.list.map)(item.clone(), index.clone()));
        Entry {
            node,
            item,
            index,
            owner,
        }
    }

    fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        for (_, entry) in entries {
            self.host.borrow_mut().remove(&entry.node);
            entry.owner.dispose();
        }
    }
}

/// A mounted [`MappedList`].
pub struct ListMount<T: 'static, K: 'static, H: ListHost + 'static> {
    state: Rc<MountState<T, K, H>>,
}

impl<T, K, H> ListMount<T, K, H>
where
    T: 'static,
    K: Clone + 'static,
    H: ListHost + 'static,
{
    /// Remove every node from the host and dispose every entry.
    pub fn unmount(&self) {
        self.state.owner.dispose();
    }

    pub fn is_mounted(&self) -> bool {
        !self.state.owner.is_disposed()
    }

    /// Number of mounted entries.
    pub fn len(&self) -> usize {
        self.state.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of the mounted entries, in order.
    pub fn keys(&self) -> Vec<K> {
        self.state.entries.borrow().keys().cloned().collect()
    }

    /// Borrow the host.
    pub fn host(&self) -> Ref<'_, H> {
        self.state.host.borrow()
    }

    /// The owner scoping the mount.
    pub fn owner(&self) -> &Owner {
        &self.state.owner
    }
}

impl<T: 'static, K: 'static, H: ListHost + 'static> fmt::Debug for ListMount<T, K, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListMount")
            .field("entries", &self.state.entries.borrow().len())
            .field("disposed", &self.state.owner.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
