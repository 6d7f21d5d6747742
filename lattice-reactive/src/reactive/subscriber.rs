//! Subscriber behaviour for the reactive system.
//!
//! The graph stores only topology. When the runtime needs to re-evaluate a
//! computed or re-run an effect it looks the node up in its subscriber table
//! and dispatches through one of these traits.

use std::rc::{Rc, Weak};

use super::effect::Cleanup;

/// A derived node that can bring its cached value up to date.
pub(crate) trait Recompute {
    /// Re-run the derivation unconditionally.
    fn recompute(&self);
}

/// An effect node the scheduler can run.
pub(crate) trait Execute {
    /// Run the effect body once.
    fn execute(&self);

    /// Push a cleanup onto the current run's cleanup stack.
    fn add_cleanup(&self, cleanup: Cleanup);

    /// Tear the effect down permanently.
    fn dispose(&self);
}

/// Behaviour attached to a subscriber node.
///
/// Computeds are owned by their handles, so the runtime only keeps a weak
/// reference. Effects stay alive until disposed, so the runtime owns them.
#[derive(Clone)]
pub(crate) enum Subscriber {
    Computed(Weak<dyn Recompute>),
    Effect(Rc<dyn Execute>),
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subscriber::Computed(weak) => f
                .debug_tuple("Computed")
                .field(&(weak.strong_count() > 0))
                .finish(),
            Subscriber::Effect(_) => f.write_str("Effect"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter(Cell<u32>);

    impl Recompute for Counter {
        fn recompute(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn computed_entries_do_not_keep_nodes_alive() {
        let node: Rc<Counter> = Rc::new(Counter(Cell::new(0)));
        let weak: Weak<dyn Recompute> = Rc::downgrade(&node) as Weak<dyn Recompute>;
        let entry = Subscriber::Computed(weak);

        if let Subscriber::Computed(weak) = &entry {
            weak.upgrade().unwrap().recompute();
        }
        assert_eq!(node.0.get(), 1);

        drop(node);
        match entry {
            Subscriber::Computed(weak) => assert!(weak.upgrade().is_none()),
            Subscriber::Effect(_) => unreachable!(),
        }
    }
}
