//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! which owner new nodes attach to. This enables automatic dependency
//! tracking: when a signal is read, the runtime connects it to the active
//! subscriber.
//!
//! # Implementation
//!
//! The runtime has three ambient slots: the active subscriber (observer),
//! the running effect, and the current owner. A [`ReactiveContext`] guard
//! overwrites some of them and restores all of them on drop, which makes
//! nested evaluations (a computed read inside another computed) behave like
//! a dynamic-scope stack, even if the computation panics.

use crate::graph::{NodeFlags, NodeKey};

use super::owner::Owner;
use super::runtime::Runtime;

/// Guard that restores the ambient slots when dropped.
pub(crate) struct ReactiveContext<'a> {
    rt: &'a Runtime,
    observer: Option<NodeKey>,
    effect: Option<NodeKey>,
    owner: Option<Owner>,
}

impl<'a> ReactiveContext<'a> {
    /// Save every slot, then overwrite the ones given as `Some`.
    fn install(
        rt: &'a Runtime,
        observer: Option<Option<NodeKey>>,
        effect: Option<Option<NodeKey>>,
        owner: Option<Option<Owner>>,
    ) -> Self {
        let inner = &rt.inner;
        let saved = Self {
            rt,
            observer: inner.observer.get(),
            effect: inner.effect.get(),
            owner: inner.owner.borrow().clone(),
        };
        if let Some(observer) = observer {
            inner.observer.set(observer);
        }
        if let Some(effect) = effect {
            inner.effect.set(effect);
        }
        if let Some(owner) = owner {
            *inner.owner.borrow_mut() = owner;
        }
        saved
    }

    /// Enter a derivation: reads connect to `key`.
    pub fn evaluate(rt: &'a Runtime, key: NodeKey, owner: Option<Owner>) -> Self {
        Self::install(rt, Some(Some(key)), Some(None), owner.map(Some))
    }

    /// Enter an effect body: reads connect to `key`, cleanups attach to it.
    pub fn effect(rt: &'a Runtime, key: NodeKey, owner: Owner) -> Self {
        Self::install(rt, Some(Some(key)), Some(Some(key)), Some(Some(owner)))
    }

    /// Suspend tracking.
    pub fn untracked(rt: &'a Runtime) -> Self {
        Self::install(rt, Some(None), None, None)
    }

    /// Make `owner` current without tracking.
    pub fn owned(rt: &'a Runtime, owner: Owner) -> Self {
        Self::install(rt, Some(None), None, Some(Some(owner)))
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        let inner = &self.rt.inner;
        inner.observer.set(self.observer);
        inner.effect.set(self.effect);
        *inner.owner.borrow_mut() = self.owner.take();
    }
}

/// Guard around one evaluation of a subscriber.
///
/// If the evaluation unwinds, the node is left dirty and not running, so
/// the next read retries instead of reporting a cycle.
pub(crate) struct EvaluationGuard<'a> {
    rt: &'a Runtime,
    key: NodeKey,
    armed: bool,
}

impl<'a> EvaluationGuard<'a> {
    pub fn new(rt: &'a Runtime, key: NodeKey) -> Self {
        Self { rt, key, armed: true }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.rt.update_flags(self.key, |flags| {
                flags.remove(NodeFlags::RUNNING);
                flags.insert(NodeFlags::DIRTY);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::graph::NodeKind;

    #[test]
    fn context_tracks_subscriber() {
        let rt = Runtime::new(RuntimeConfig::default());
        let key = rt.register(NodeKind::Derived, None);

        assert!(rt.observer().is_none());
        {
            let _ctx = ReactiveContext::evaluate(&rt, key, None);
            assert_eq!(rt.observer(), Some(key));
        }
        // Context should be cleaned up after drop
        assert!(rt.observer().is_none());
    }

    #[test]
    fn nested_contexts() {
        let rt = Runtime::new(RuntimeConfig::default());
        let outer = rt.register(NodeKind::Derived, None);
        let inner = rt.register(NodeKind::Effect, None);

        {
            let _outer = ReactiveContext::evaluate(&rt, outer, None);
            {
                let _inner = ReactiveContext::effect(&rt, inner, Owner::new());
                assert_eq!(rt.observer(), Some(inner));
                assert_eq!(rt.running_effect(), Some(inner));
                assert!(rt.owner().is_some());

                let _untracked = ReactiveContext::untracked(&rt);
                assert!(rt.observer().is_none());
                assert_eq!(rt.running_effect(), Some(inner));
            }
            // After inner context drops, outer should be current
            assert_eq!(rt.observer(), Some(outer));
            assert!(rt.running_effect().is_none());
            assert!(rt.owner().is_none());
        }
        assert!(rt.observer().is_none());
    }

    #[test]
    fn unwinding_evaluation_leaves_node_dirty() {
        let rt = Runtime::new(RuntimeConfig::default());
        let key = rt.register(NodeKind::Derived, None);
        rt.update_flags(key, |flags| *flags = NodeFlags::RUNNING);

        drop(EvaluationGuard::new(&rt, key));
        assert_eq!(rt.flags(key), Some(NodeFlags::DIRTY));
    }
}
