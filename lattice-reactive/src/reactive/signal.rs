//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (computed/effect), the
//!    runtime connects the signal to that context.
//!
//! 2. When a signal's value changes, it is stamped with a fresh version and
//!    its subscribers are invalidated.
//!
//! 3. Writing a value equal to the current one does nothing at all.
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A node key into the runtime graph (flags, version, link lists)
//! - The value, shared behind an `Rc` by every clone of the handle
//! - An equality function deciding whether a write is a real change

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use crate::graph::{NodeKey, NodeKind};

use super::runtime::Runtime;

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use lattice_reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// assert_eq!(count.peek(), 5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

struct SignalInner<T> {
    rt: Runtime,
    key: NodeKey,
    value: RefCell<T>,
    equals: fn(&T, &T) -> bool,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        self.rt.remove_node(self.key);
    }
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Create a new signal on the current runtime.
    pub fn new(value: T) -> Self {
        Self::new_in(&Runtime::current(), value)
    }

    /// Create a new signal on `rt`.
    pub fn new_in(rt: &Runtime, value: T) -> Self {
        Self::with_equals_in(rt, value, <T as PartialEq>::eq)
    }
}

impl<T: 'static> Signal<T> {
    /// Create a signal that uses `equals` to detect real changes.
    pub fn with_equals(value: T, equals: fn(&T, &T) -> bool) -> Self {
        Self::with_equals_in(&Runtime::current(), value, equals)
    }

    /// [`Signal::with_equals`] on an explicit runtime.
    pub fn with_equals_in(rt: &Runtime, value: T, equals: fn(&T, &T) -> bool) -> Self {
        let key = rt.register(NodeKind::Source, None);
        Self {
            inner: Rc::new(SignalInner {
                rt: rt.clone(),
                key,
                value: RefCell::new(value),
                equals,
            }),
        }
    }

    /// The node key of this signal.
    pub fn id(&self) -> NodeKey {
        self.inner.key
    }

    /// The runtime this signal belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.rt
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a subscriber.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.rt.track(self.inner.key);
        f(&*self.inner.value.borrow())
    }

    /// Get the current value without tracking dependencies.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.peek_with(T::clone)
    }

    /// Borrow the current value without tracking the read.
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.inner.value.borrow())
    }

    /// Set a new value and notify subscribers if it differs.
    ///
    /// Returns whether the value changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.borrow_mut();
            if (self.inner.equals)(&*current, &value) {
                return false;
            }
            *current = value;
        }
        self.notify();
        true
    }

    /// Replace the value with one computed from the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = f(&*self.inner.value.borrow());
        self.set(next)
    }

    /// Mutate the value in place. Always notifies, since the old value is
    /// not kept for comparison.
    pub fn update_in_place<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut *self.inner.value.borrow_mut());
        self.notify();
        result
    }

    /// Mark the signal changed without writing.
    pub fn notify(&self) {
        self.inner.rt.mark_changed(self.inner.key);
    }

    /// The clock value of the last real change (0 if never written).
    pub fn version(&self) -> u64 {
        self.inner.rt.version(self.inner.key)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.rt.subscriber_count(self.inner.key)
    }

    /// A read-only view of this signal.
    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal { signal: self.clone() }
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.key)
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.version())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Read-only handle to a [`Signal`].
pub struct ReadSignal<T: 'static> {
    signal: Signal<T>,
}

impl<T: 'static> ReadSignal<T> {
    pub fn id(&self) -> NodeKey {
        self.signal.id()
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.signal.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with(f)
    }

    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.signal.peek()
    }

    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.peek_with(f)
    }

    pub fn version(&self) -> u64 {
        self.signal.version()
    }
}

impl<T: 'static> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: Debug + 'static> Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReadSignal").field(&self.signal).finish()
    }
}

impl<T: 'static> From<Signal<T>> for ReadSignal<T> {
    fn from(signal: Signal<T>) -> Self {
        Self { signal }
    }
}

/// A source with no value: something to depend on and something to fire.
///
/// Collections use triggers for changes that are not captured by value
/// comparison, such as "the length changed" or "the items were reordered".
#[derive(Clone)]
pub struct Trigger {
    inner: Rc<TriggerInner>,
}

struct TriggerInner {
    rt: Runtime,
    key: NodeKey,
}

impl Drop for TriggerInner {
    fn drop(&mut self) {
        self.rt.remove_node(self.key);
    }
}

impl Trigger {
    pub fn new() -> Self {
        Self::new_in(&Runtime::current())
    }

    pub fn new_in(rt: &Runtime) -> Self {
        let key = rt.register(NodeKind::Source, None);
        Self {
            inner: Rc::new(TriggerInner { rt: rt.clone(), key }),
        }
    }

    pub fn id(&self) -> NodeKey {
        self.inner.key
    }

    /// Depend on this trigger from the active subscriber.
    pub fn track(&self) {
        self.inner.rt.track(self.inner.key);
    }

    /// Invalidate everything that tracked this trigger.
    pub fn notify(&self) {
        self.inner.rt.mark_changed(self.inner.key);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.rt.subscriber_count(self.inner.key)
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.inner.key)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use std::cell::Cell;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default())
    }

    #[test]
    fn signal_get_and_set() {
        let rt = runtime();
        let signal = rt.signal(0);
        assert_eq!(signal.get(), 0);

        assert!(signal.set(42));
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let rt = runtime();
        let signal = rt.signal(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let rt = runtime();
        let signal = rt.signal(String::from("same"));
        signal.set("other".into());
        let version = signal.version();

        assert!(!signal.set("other".into()));
        assert_eq!(signal.version(), version);
    }

    #[test]
    fn custom_equality_controls_notification() {
        let rt = runtime();
        let signal = Signal::with_equals_in(&rt, 1.0_f64, |a, b| (a - b).abs() < 0.5);

        assert!(!signal.set(1.2));
        assert_eq!(signal.peek(), 1.0);
        assert!(signal.set(2.0));
    }

    #[test]
    fn update_in_place_always_notifies() {
        let rt = runtime();
        let items = rt.signal(vec![1, 2]);
        let before = items.version();

        let len = items.update_in_place(|v| {
            v.push(3);
            v.len()
        });
        assert_eq!(len, 3);
        assert!(items.version() > before);
        assert_eq!(items.peek_with(|v| v.iter().sum::<i32>()), 6);
    }

    #[test]
    fn signal_clone_shares_state() {
        let rt = runtime();
        let signal1 = rt.signal(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);

        signal2.set(100);
        assert_eq!(signal1.get(), 100);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn read_only_view_follows_writes() {
        let rt = runtime();
        let signal = rt.signal(1);
        let view = signal.read_only();
        signal.set(2);
        assert_eq!(view.get(), 2);
        assert_eq!(view.id(), signal.id());
    }

    #[test]
    fn peek_inside_effect_creates_no_edge() {
        let rt = runtime();
        let tracked = rt.signal(1);
        let peeked = rt.signal(1);
        let runs = Rc::new(Cell::new(0));
        let _effect = {
            let (tracked, peeked, runs) = (tracked.clone(), peeked.clone(), runs.clone());
            rt.effect(move || {
                tracked.get();
                peeked.peek();
                runs.set(runs.get() + 1);
            })
        };

        assert_eq!(tracked.subscriber_count(), 1);
        assert_eq!(peeked.subscriber_count(), 0);
    }

    #[test]
    fn trigger_invalidates_trackers() {
        let rt = runtime();
        let trigger = rt.trigger();
        let runs = Rc::new(Cell::new(0));
        let _effect = {
            let (trigger, runs) = (trigger.clone(), runs.clone());
            rt.effect(move || {
                trigger.track();
                runs.set(runs.get() + 1);
            })
        };

        trigger.notify();
        rt.flush().unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn dropping_last_handle_removes_node() {
        let rt = runtime();
        let signal = rt.signal(0);
        let copy = signal.clone();
        drop(signal);
        assert_eq!(rt.node_count(), 1);
        drop(copy);
        assert_eq!(rt.node_count(), 0);
    }
}
