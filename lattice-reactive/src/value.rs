//! Plain-or-reactive values.
//!
//! Collaborators such as a renderer accept properties that may be fixed
//! values or cells. [`MaybeReactive`] carries either; [`MaybeReactive::is_reactive`]
//! tells the collaborator whether it needs to subscribe at all.
//!
//! Reactive handles also format and combine like the values they hold:
//! `format!("{count}")` and `&count + 1` are tracked reads.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;

use crate::graph::NodeKey;
use crate::reactive::{Computed, ReadSignal, Runtime, Signal, Trigger};

/// Anything backed by a node in a runtime graph.
pub trait Reactive {
    /// The node key of the cell.
    fn id(&self) -> NodeKey;

    /// Register a dependency from the active subscriber without reading.
    fn track(&self);
}

impl<T: 'static> Reactive for Signal<T> {
    fn id(&self) -> NodeKey {
        Signal::id(self)
    }

    fn track(&self) {
        self.with(|_| ());
    }
}

impl<T: 'static> Reactive for ReadSignal<T> {
    fn id(&self) -> NodeKey {
        ReadSignal::id(self)
    }

    fn track(&self) {
        self.with(|_| ());
    }
}

impl<T: 'static> Reactive for Computed<T> {
    fn id(&self) -> NodeKey {
        Computed::id(self)
    }

    fn track(&self) {
        self.with(|_| ());
    }
}

impl Reactive for Trigger {
    fn id(&self) -> NodeKey {
        Trigger::id(self)
    }

    fn track(&self) {
        Trigger::track(self);
    }
}

/// A value that is either fixed or read from the reactive graph.
pub enum MaybeReactive<T: 'static> {
    Static(T),
    Signal(ReadSignal<T>),
    Computed(Computed<T>),
    Derived(Rc<dyn Fn() -> T>),
}

impl<T: Clone + 'static> MaybeReactive<T> {
    /// Wrap a closure that is re-run on every read.
    pub fn derived(f: impl Fn() -> T + 'static) -> Self {
        Self::Derived(Rc::new(f))
    }

    /// Read the value, tracking it if it is reactive.
    pub fn get(&self) -> T {
        match self {
            Self::Static(value) => value.clone(),
            Self::Signal(signal) => signal.get(),
            Self::Computed(computed) => computed.get(),
            Self::Derived(f) => f(),
        }
    }

    /// Read the value without tracking.
    pub fn peek(&self) -> T {
        match self {
            Self::Static(value) => value.clone(),
            Self::Signal(signal) => signal.peek(),
            Self::Computed(computed) => computed.peek(),
            Self::Derived(f) => Runtime::current().untrack(|| f()),
        }
    }
}

impl<T: 'static> MaybeReactive<T> {
    /// Whether reading this value can create a dependency.
    pub fn is_reactive(&self) -> bool {
        !matches!(self, Self::Static(_))
    }
}

impl<T: Clone + 'static> Clone for MaybeReactive<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(value) => Self::Static(value.clone()),
            Self::Signal(signal) => Self::Signal(signal.clone()),
            Self::Computed(computed) => Self::Computed(computed.clone()),
            Self::Derived(f) => Self::Derived(Rc::clone(f)),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for MaybeReactive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Signal(signal) => f.debug_tuple("Signal").field(signal).finish(),
            Self::Computed(computed) => f.debug_tuple("Computed").field(computed).finish(),
            Self::Derived(_) => f.write_str("Derived"),
        }
    }
}

impl<T: Default + 'static> Default for MaybeReactive<T> {
    fn default() -> Self {
        Self::Static(T::default())
    }
}

impl<T: 'static> From<T> for MaybeReactive<T> {
    fn from(value: T) -> Self {
        Self::Static(value)
    }
}

impl<T: 'static> From<Signal<T>> for MaybeReactive<T> {
    fn from(signal: Signal<T>) -> Self {
        Self::Signal(signal.into())
    }
}

impl<T: 'static> From<ReadSignal<T>> for MaybeReactive<T> {
    fn from(signal: ReadSignal<T>) -> Self {
        Self::Signal(signal)
    }
}

impl<T: 'static> From<Computed<T>> for MaybeReactive<T> {
    fn from(computed: Computed<T>) -> Self {
        Self::Computed(computed)
    }
}

// ----------------------------------------------------------------------------
// Formatting and arithmetic as tracked reads
// ----------------------------------------------------------------------------

macro_rules! impl_display {
    ($($cell:ident),*) => {$(
        impl<T: fmt::Display + 'static> fmt::Display for $cell<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.with(|value| value.fmt(f))
            }
        }
    )*};
}

impl_display!(Signal, ReadSignal, Computed);

macro_rules! impl_binary_op {
    ($op:ident, $method:ident, $($cell:ident),*) => {$(
        impl<'a, T, Rhs> $op<Rhs> for &'a $cell<T>
        where
            T: Clone + $op<Rhs> + 'static,
        {
            type Output = <T as $op<Rhs>>::Output;

            fn $method(self, rhs: Rhs) -> Self::Output {
                self.get().$method(rhs)
            }
        }
    )*};
}

impl_binary_op!(Add, add, Signal, ReadSignal, Computed);
impl_binary_op!(Sub, sub, Signal, ReadSignal, Computed);
impl_binary_op!(Mul, mul, Signal, ReadSignal, Computed);
impl_binary_op!(Div, div, Signal, ReadSignal, Computed);
