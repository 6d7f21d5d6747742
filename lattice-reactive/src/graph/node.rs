//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//! A node only carries topology and bookkeeping; values and closures live in
//! the typed handles of the `reactive` module.

use bitflags::bitflags;
use slotmap::new_key_type;

use super::link::LinkId;

new_key_type! {
    /// Unique identifier for a node in the dependency graph.
    pub struct NodeKey;
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (signal or trigger). These are the roots of the graph.
    /// They have no dependencies, only subscribers.
    Source,

    /// A derived node (computed). Both an observable and a subscriber.
    Derived,

    /// An effect node. These are leaves of the graph.
    Effect,
}

impl NodeKind {
    /// Whether nodes of this kind can be depended on.
    pub fn is_observable(self) -> bool {
        matches!(self, NodeKind::Source | NodeKind::Derived)
    }

    /// Whether nodes of this kind hold dependencies.
    pub fn is_subscriber(self) -> bool {
        matches!(self, NodeKind::Derived | NodeKind::Effect)
    }
}

bitflags! {
    /// Bookkeeping state of a subscriber node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// The node is evaluating right now.
        const RUNNING  = 1 << 0;
        /// The node was triggered while running and owes one more run.
        const NOTIFIED = 1 << 1;
        /// A direct dependency changed; the node must re-evaluate.
        const DIRTY    = 1 << 2;
        /// Something upstream changed; the node must verify before re-evaluating.
        const STALE    = 1 << 3;
        /// The node was disposed and is permanently inert.
        const DISPOSED = 1 << 4;
    }
}

impl NodeFlags {
    /// Either invalidation flag.
    pub const INVALID: NodeFlags = NodeFlags::DIRTY.union(NodeFlags::STALE);
}

/// Head and tail of one intrusive list of links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkList {
    pub head: Option<LinkId>,
    pub tail: Option<LinkId>,
}

impl LinkList {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    kind: NodeKind,

    /// Current flags.
    pub flags: NodeFlags,

    /// Clock value stamped on the last real change (observables only).
    pub version: u64,

    /// Clock value at the end of the last successful evaluation or
    /// verification (subscribers only).
    pub epoch: u64,

    /// Links to the nodes this node reads from.
    pub deps: LinkList,

    /// Links to the nodes that read from this node.
    pub subs: LinkList,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            flags: match kind {
                NodeKind::Source => NodeFlags::empty(),
                // Start dirty to ensure first evaluation
                NodeKind::Derived | NodeKind::Effect => NodeFlags::DIRTY,
            },
            version: 0,
            epoch: 0,
            deps: LinkList::default(),
            subs: LinkList::default(),
        }
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Whether neither invalidation flag is set.
    pub fn is_clean(&self) -> bool {
        !self.flags.intersects(NodeFlags::INVALID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_node_starts_clean() {
        let node = Node::new(NodeKind::Source);
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(node.is_clean());
        assert!(node.kind().is_observable());
        assert!(!node.kind().is_subscriber());
    }

    #[test]
    fn derived_node_starts_dirty() {
        let node = Node::new(NodeKind::Derived);
        assert!(node.flags.contains(NodeFlags::DIRTY));
        assert!(!node.is_clean());
        assert!(node.kind().is_observable() && node.kind().is_subscriber());
    }

    #[test]
    fn stale_alone_is_not_clean() {
        let mut node = Node::new(NodeKind::Derived);
        node.flags = NodeFlags::STALE;
        assert!(!node.is_clean());
        node.flags.remove(NodeFlags::INVALID);
        assert!(node.is_clean());
    }
}
