//! Link Pool
//!
//! A link is one edge of the dependency graph. Each link sits in two
//! intrusive doubly-linked lists at once: the subscriber's dependency list
//! (`prev_dep`/`next_dep`) and the dependency's subscriber list
//! (`prev_sub`/`next_sub`).
//!
//! Links are stored in an index arena. Released slots go on a free list and
//! are handed out again before the arena grows, so a steady update load does
//! not allocate. Once the free slots outnumber both the live links and the
//! configured capacity, the owning graph compacts the arena and renumbers
//! the surviving links, so the pool never holds much more than its peak
//! live load or its capacity, whichever is larger.

use super::node::NodeKey;

/// Index of a link slot in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u32);

impl LinkId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One edge from an observable (`dep`) to a subscriber (`sub`).
#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub dep: NodeKey,
    pub sub: NodeKey,
    pub prev_dep: Option<LinkId>,
    pub next_dep: Option<LinkId>,
    pub prev_sub: Option<LinkId>,
    pub next_sub: Option<LinkId>,
}

impl Link {
    pub fn new(dep: NodeKey, sub: NodeKey) -> Self {
        Self {
            dep,
            sub,
            prev_dep: None,
            next_dep: None,
            prev_sub: None,
            next_sub: None,
        }
    }
}

/// Old-to-new id table produced by [`LinkPool::compact`].
#[derive(Debug)]
pub struct LinkRemap(Vec<Option<LinkId>>);

impl LinkRemap {
    pub fn apply(&self, id: Option<LinkId>) -> Option<LinkId> {
        id.and_then(|id| self.0[id.index()])
    }
}

/// Arena of links with a free list.
#[derive(Debug)]
pub struct LinkPool {
    slots: Vec<Option<Link>>,
    free: Vec<LinkId>,
    live: usize,
    capacity: usize,
}

impl LinkPool {
    /// Create a pool that keeps up to `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            capacity,
        }
    }

    /// Store a link, reusing a released slot if one is available.
    pub fn acquire(&mut self, link: Link) -> LinkId {
        self.live += 1;
        if let Some(id) = self.free.pop() {
            self.slots[id.index()] = Some(link);
            return id;
        }
        let id = LinkId(u32::try_from(self.slots.len()).expect("link pool exhausted"));
        self.slots.push(Some(link));
        id
    }

    /// Return a slot to the pool.
    pub fn release(&mut self, id: LinkId) {
        debug_assert!(self.live > 0, "releasing a link from an empty pool");
        self.live -= 1;
        if self.live == 0 {
            // Every slot is free: drop them all and cap the retained memory.
            self.slots.clear();
            self.free.clear();
            self.slots.shrink_to(self.capacity);
            self.free.shrink_to(self.capacity);
        } else {
            self.slots[id.index()] = None;
            self.free.push(id);
        }
    }

    /// Whether enough slots are free that [`LinkPool::compact`] should run.
    pub fn is_fragmented(&self) -> bool {
        self.free.len() > self.capacity.max(self.live)
    }

    /// Move every live link to the front of the arena and drop the free
    /// slots. Links are rewritten in place; the caller must pass node list
    /// heads and tails through the returned table.
    pub fn compact(&mut self) -> LinkRemap {
        let mut next = 0u32;
        let remap = LinkRemap(
            self.slots
                .iter()
                .map(|slot| {
                    slot.map(|_| {
                        let id = LinkId(next);
                        next += 1;
                        id
                    })
                })
                .collect(),
        );
        let mut slots: Vec<Option<Link>> = Vec::with_capacity(self.capacity.max(self.live));
        for mut link in std::mem::take(&mut self.slots).into_iter().flatten() {
            link.prev_dep = remap.apply(link.prev_dep);
            link.next_dep = remap.apply(link.next_dep);
            link.prev_sub = remap.apply(link.prev_sub);
            link.next_sub = remap.apply(link.next_sub);
            slots.push(Some(link));
        }
        self.slots = slots;
        self.free.clear();
        self.free.shrink_to(self.capacity);
        remap
    }

    pub fn get(&self, id: LinkId) -> &Link {
        self.slots[id.index()]
            .as_ref()
            .expect("link id refers to a live slot")
    }

    pub fn get_mut(&mut self, id: LinkId) -> &mut Link {
        self.slots[id.index()]
            .as_mut()
            .expect("link id refers to a live slot")
    }

    /// Number of links in use.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of released slots waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.free.len()
    }

    /// Allocated slot capacity.
    pub fn allocated(&self) -> usize {
        self.slots.capacity()
    }
}
