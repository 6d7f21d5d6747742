//! Dependency Graph
//!
//! This module implements the push-based dependency graph that connects
//! observables (signals, computeds) to subscribers (computeds, effects).
//!
//! # Overview
//!
//! - Nodes live in a slot map keyed by [`NodeKey`]. They carry flags, the
//!   version stamp and the heads/tails of their two link lists.
//! - Edges are pooled [`Link`](link::Link) records, each threaded through
//!   the subscriber's dependency list and the observable's subscriber list.
//!
//! # Design Decisions
//!
//! 1. We use intrusive linked lists over an index arena rather than hash
//!    sets because:
//!    - connecting an edge is O(1) with no hashing
//!    - dropping every dependency of a subscriber is O(k) in its own edges
//!    - subscriber order is registration order, which the scheduler relies on
//!
//! 2. Dependencies are rebuilt from scratch on every evaluation. A branch not
//!    taken simply creates no edge, which is what makes conditional
//!    dependencies correct.
//!
//! 3. The graph knows nothing about values or closures; the runtime maps
//!    keys to behaviour.

mod link;
mod node;
mod scheduler;

pub use link::{Link, LinkId, LinkPool};
pub use node::{LinkList, Node, NodeFlags, NodeKey, NodeKind};
pub use scheduler::{Microtask, MicrotaskSpawner, Scheduler};

use slotmap::SlotMap;
use smallvec::SmallVec;

/// Snapshot of node keys taken from one link list.
pub type NodeList = SmallVec<[NodeKey; 8]>;

/// The dependency graph: node arena plus link pool.
#[derive(Debug)]
pub struct Graph {
    nodes: SlotMap<NodeKey, Node>,
    links: LinkPool,
}

impl Graph {
    /// Create an empty graph whose link pool retains `link_capacity` slots.
    pub fn new(link_capacity: usize) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            links: LinkPool::new(link_capacity),
        }
    }

    /// Add a node to the graph.
    pub fn insert(&mut self, kind: NodeKind) -> NodeKey {
        self.nodes.insert(Node::new(kind))
    }

    /// Remove a node from the graph, dropping every edge touching it.
    pub fn remove(&mut self, key: NodeKey) -> Option<Node> {
        if !self.nodes.contains_key(key) {
            return None;
        }
        self.disconnect_dependencies(key);
        self.disconnect_subscribers(key);
        self.nodes.remove(key)
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The link pool, for diagnostics.
    pub fn links(&self) -> &LinkPool {
        &self.links
    }

    /// Add an edge: `sub` depends on `dep`.
    ///
    /// Appends to both lists. If `dep` is already the most recent dependency
    /// of `sub` the call is a no-op, so repeated reads of the same value in
    /// one evaluation do not stack edges. Returns whether an edge was added.
    pub fn connect(&mut self, dep: NodeKey, sub: NodeKey) -> bool {
        let (Some(dep_node), Some(sub_node)) = (self.nodes.get(dep), self.nodes.get(sub)) else {
            return false;
        };
        debug_assert!(dep_node.kind().is_observable());
        debug_assert!(sub_node.kind().is_subscriber());

        if let Some(tail) = sub_node.deps.tail {
            if self.links.get(tail).dep == dep {
                return false;
            }
        }
        let dep_tail = dep_node.subs.tail;
        let sub_tail = sub_node.deps.tail;

        let id = self.links.acquire(Link {
            dep,
            sub,
            prev_dep: sub_tail,
            next_dep: None,
            prev_sub: dep_tail,
            next_sub: None,
        });

        match sub_tail {
            Some(tail) => self.links.get_mut(tail).next_dep = Some(id),
            None => self.nodes[sub].deps.head = Some(id),
        }
        self.nodes[sub].deps.tail = Some(id);

        match dep_tail {
            Some(tail) => self.links.get_mut(tail).next_sub = Some(id),
            None => self.nodes[dep].subs.head = Some(id),
        }
        self.nodes[dep].subs.tail = Some(id);

        tracing::trace!(?dep, ?sub, "connected");
        true
    }

    /// Drop every dependency edge of `sub`. O(k) in its dependency count.
    pub fn disconnect_dependencies(&mut self, sub: NodeKey) {
        let Some(node) = self.nodes.get_mut(sub) else {
            return;
        };
        let mut cursor = node.deps.head.take();
        node.deps.tail = None;

        while let Some(id) = cursor {
            let link = *self.links.get(id);
            cursor = link.next_dep;
            self.unlink_from_subscribers(&link);
            self.links.release(id);
        }
        self.reclaim_links();
    }

    /// Drop every subscriber edge of `dep`.
    pub fn disconnect_subscribers(&mut self, dep: NodeKey) {
        let Some(node) = self.nodes.get_mut(dep) else {
            return;
        };
        let mut cursor = node.subs.head.take();
        node.subs.tail = None;

        while let Some(id) = cursor {
            let link = *self.links.get(id);
            cursor = link.next_sub;
            self.unlink_from_dependencies(&link);
            self.links.release(id);
        }
        self.reclaim_links();
    }

    /// Compact the link pool once it holds more free slots than it should,
    /// renumbering the list heads and tails that point into it.
    fn reclaim_links(&mut self) {
        if !self.links.is_fragmented() {
            return;
        }
        let remap = self.links.compact();
        for node in self.nodes.values_mut() {
            node.deps.head = remap.apply(node.deps.head);
            node.deps.tail = remap.apply(node.deps.tail);
            node.subs.head = remap.apply(node.subs.head);
            node.subs.tail = remap.apply(node.subs.tail);
        }
        tracing::debug!(live = self.links.live(), "compacted link pool");
    }

    /// Splice `link` out of its dependency's subscriber list.
    fn unlink_from_subscribers(&mut self, link: &Link) {
        match link.prev_sub {
            Some(prev) => self.links.get_mut(prev).next_sub = link.next_sub,
            None => {
                if let Some(dep) = self.nodes.get_mut(link.dep) {
                    dep.subs.head = link.next_sub;
                }
            }
        }
        match link.next_sub {
            Some(next) => self.links.get_mut(next).prev_sub = link.prev_sub,
            None => {
                if let Some(dep) = self.nodes.get_mut(link.dep) {
                    dep.subs.tail = link.prev_sub;
                }
            }
        }
    }

    /// Splice `link` out of its subscriber's dependency list.
    fn unlink_from_dependencies(&mut self, link: &Link) {
        match link.prev_dep {
            Some(prev) => self.links.get_mut(prev).next_dep = link.next_dep,
            None => {
                if let Some(sub) = self.nodes.get_mut(link.sub) {
                    sub.deps.head = link.next_dep;
                }
            }
        }
        match link.next_dep {
            Some(next) => self.links.get_mut(next).prev_dep = link.prev_dep,
            None => {
                if let Some(sub) = self.nodes.get_mut(link.sub) {
                    sub.deps.tail = link.prev_dep;
                }
            }
        }
    }

    /// Subscribers of `dep`, in registration order.
    pub fn subscribers(&self, dep: NodeKey) -> NodeList {
        let mut out = NodeList::new();
        let mut cursor = self.nodes.get(dep).and_then(|n| n.subs.head);
        while let Some(id) = cursor {
            let link = self.links.get(id);
            out.push(link.sub);
            cursor = link.next_sub;
        }
        out
    }

    /// Dependencies of `sub`, in read order.
    pub fn dependencies(&self, sub: NodeKey) -> NodeList {
        let mut out = NodeList::new();
        let mut cursor = self.nodes.get(sub).and_then(|n| n.deps.head);
        while let Some(id) = cursor {
            let link = self.links.get(id);
            out.push(link.dep);
            cursor = link.next_dep;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_links_both_lists() {
        let mut graph = Graph::new(16);
        let source = graph.insert(NodeKind::Source);
        let derived = graph.insert(NodeKind::Derived);
        let effect = graph.insert(NodeKind::Effect);

        assert!(graph.connect(source, derived));
        assert!(graph.connect(source, effect));
        assert!(graph.connect(derived, effect));

        assert_eq!(graph.subscribers(source).as_slice(), &[derived, effect]);
        assert_eq!(graph.dependencies(effect).as_slice(), &[source, derived]);
        assert_eq!(graph.links().live(), 3);
    }

    #[test]
    fn repeated_read_does_not_stack_edges() {
        let mut graph = Graph::new(16);
        let source = graph.insert(NodeKind::Source);
        let effect = graph.insert(NodeKind::Effect);

        assert!(graph.connect(source, effect));
        assert!(!graph.connect(source, effect));
        assert_eq!(graph.subscribers(source).len(), 1);
    }

    #[test]
    fn disconnect_dependencies_splices_middle_links() {
        let mut graph = Graph::new(16);
        let source = graph.insert(NodeKind::Source);
        let first = graph.insert(NodeKind::Effect);
        let middle = graph.insert(NodeKind::Effect);
        let last = graph.insert(NodeKind::Effect);

        graph.connect(source, first);
        graph.connect(source, middle);
        graph.connect(source, last);

        graph.disconnect_dependencies(middle);
        assert_eq!(graph.subscribers(source).as_slice(), &[first, last]);
        assert!(graph.dependencies(middle).is_empty());

        graph.disconnect_dependencies(last);
        assert_eq!(graph.subscribers(source).as_slice(), &[first]);
        assert_eq!(graph.node(source).unwrap().subs.tail, graph.node(first).unwrap().deps.head);

        // The freed tail slot is reused by the next connection.
        graph.connect(source, last);
        assert_eq!(graph.subscribers(source).as_slice(), &[first, last]);
    }

    #[test]
    fn churn_around_a_long_lived_edge_stays_bounded() {
        let mut graph = Graph::new(4);
        let source = graph.insert(NodeKind::Source);
        let early = graph.insert(NodeKind::Effect);
        graph.connect(source, early);

        let churn: Vec<_> = (0..1000).map(|_| graph.insert(NodeKind::Effect)).collect();
        for &sub in &churn {
            graph.connect(source, sub);
        }
        let late = graph.insert(NodeKind::Effect);
        graph.connect(source, late);

        for &sub in &churn {
            graph.disconnect_dependencies(sub);
        }

        assert_eq!(graph.links().live(), 2);
        assert!(graph.links().pooled() <= 4);
        assert!(graph.links().allocated() <= 64);
        assert_eq!(graph.subscribers(source).as_slice(), &[early, late]);
        assert_eq!(graph.dependencies(late).as_slice(), &[source]);

        // Renumbered links still splice correctly.
        graph.disconnect_dependencies(early);
        assert_eq!(graph.subscribers(source).as_slice(), &[late]);
        graph.connect(source, early);
        assert_eq!(graph.subscribers(source).as_slice(), &[late, early]);
    }

    #[test]
    fn remove_node_drops_edges_both_ways() {
        let mut graph = Graph::new(16);
        let source = graph.insert(NodeKind::Source);
        let derived = graph.insert(NodeKind::Derived);
        let effect = graph.insert(NodeKind::Effect);

        graph.connect(source, derived);
        graph.connect(derived, effect);

        assert!(graph.remove(derived).is_some());
        assert!(graph.subscribers(source).is_empty());
        assert!(graph.dependencies(effect).is_empty());
        assert_eq!(graph.links().live(), 0);
        assert_eq!(graph.node_count(), 2);
        assert!(graph.remove(derived).is_none());
    }
}
