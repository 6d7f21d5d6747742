//! Async Resources
//!
//! A [`Resource`] turns a fetcher returning a future into reactive state.
//!
//! # How Resources Work
//!
//! 1. The fetcher runs inside an effect, so any cell it reads synchronously
//!    becomes a dependency. When one of them changes, the resource fetches
//!    again.
//!
//! 2. The returned future is polled once on the spot. A future that is
//!    already complete commits immediately: a synchronous derivation never
//!    shows a pending state. Otherwise the future is handed to the
//!    runtime's task spawner and the resource turns `Pending`.
//!
//! 3. Every fetch gets a request id. A completion whose id is no longer the
//!    latest one issued is discarded, so a slow early request can never
//!    overwrite the result of a later one.
//!
//! Pending fetches need a task spawner on the runtime, for example
//! [`tokio_tasks`](crate::tokio_tasks) inside a `tokio::task::LocalSet`.
//! Without one the fetch is dropped with an error log and the status is
//! left as it was.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_util::future::LocalBoxFuture;
use futures_util::task::noop_waker_ref;
use futures_util::FutureExt;

use crate::reactive::{Effect, Runtime, Signal};

/// Where a resource is in its fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceStatus {
    /// No fetch issued: the source returned `None`.
    #[default]
    Idle,
    Pending,
    Ready,
    Errored,
}

type Fetch<T, E> = Box<dyn Fn() -> Option<LocalBoxFuture<'static, Result<T, E>>>>;

/// Reactive state backed by an async fetcher.
///
/// ```rust
/// use lattice_reactive::{Resource, ResourceStatus};
///
/// let answer = Resource::new(|| async { Ok::<_, String>(42) });
/// assert_eq!(answer.status(), ResourceStatus::Ready);
/// assert_eq!(answer.get().as_deref(), Some(&42));
/// ```
pub struct Resource<T: 'static, E: 'static> {
    inner: Rc<ResourceInner<T, E>>,
}

struct ResourceInner<T: 'static, E: 'static> {
    rt: Runtime,
    status: Signal<ResourceStatus>,
    value: Signal<Option<Rc<T>>>,
    error: Signal<Option<Rc<E>>>,
    request: Cell<u64>,
    fetch: Fetch<T, E>,
    effect: RefCell<Option<Effect>>,
}

fn same_rc<T>(a: &Option<Rc<T>>, b: &Option<Rc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl<T: 'static, E: 'static> ResourceInner<T, E> {
    /// Issue a new request.
    fn start(self: &Rc<Self>) {
        let id = self.request.get() + 1;
        self.request.set(id);

        let Some(mut future) = (self.fetch)() else {
            tracing::trace!(request = id, "resource source unset");
            self.status.set(ResourceStatus::Idle);
            return;
        };

        let mut cx = Context::from_waker(noop_waker_ref());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => self.commit(id, result),
            Poll::Pending => {
                let weak = Rc::downgrade(self);
                let task = async move {
                    let result = future.await;
                    if let Some(inner) = weak.upgrade() {
                        inner.commit(id, result);
                    }
                };
                match self.rt.spawn_task(task.boxed_local()) {
                    Ok(()) => {
                        self.status.set(ResourceStatus::Pending);
                    }
                    Err(err) => {
                        tracing::error!(request = id, error = %err, "pending resource fetch dropped")
                    }
                }
            }
        }
    }

    fn commit(&self, id: u64, result: Result<T, E>) {
        let latest = self.request.get();
        if id != latest {
            tracing::debug!(request = id, latest, "discarding superseded resource result");
            return;
        }
        match result {
            Ok(value) => {
                self.value.set(Some(Rc::new(value)));
                self.error.set(None);
                self.status.set(ResourceStatus::Ready);
            }
            Err(err) => {
                self.error.set(Some(Rc::new(err)));
                self.status.set(ResourceStatus::Errored);
            }
        }
        tracing::trace!(request = id, status = ?self.status.peek(), "resource settled");
    }
}

impl<T: 'static, E: 'static> Drop for ResourceInner<T, E> {
    fn drop(&mut self) {
        if let Some(effect) = self.effect.get_mut().take() {
            effect.dispose();
        }
    }
}

impl<T: 'static, E: 'static> Resource<T, E> {
    /// Create a resource on the current runtime.
    pub fn new<F, Fut>(fetcher: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        Self::new_in(&Runtime::current(), fetcher)
    }

    /// [`Resource::new`] on an explicit runtime.
    pub fn new_in<F, Fut>(rt: &Runtime, fetcher: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        Self::with_source_in(rt, || Some(()), move |()| fetcher())
    }

    /// Create a resource that fetches whenever `source` yields a new value.
    ///
    /// While `source` returns `None` no fetch is issued and the status is
    /// [`ResourceStatus::Idle`].
    pub fn with_source<S, F, Fut>(source: impl Fn() -> Option<S> + 'static, fetcher: F) -> Self
    where
        F: Fn(S) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        Self::with_source_in(&Runtime::current(), source, fetcher)
    }

    /// [`Resource::with_source`] on an explicit runtime.
    pub fn with_source_in<S, F, Fut>(
        rt: &Runtime,
        source: impl Fn() -> Option<S> + 'static,
        fetcher: F,
    ) -> Self
    where
        F: Fn(S) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        let fetch: Fetch<T, E> = Box::new(move || source().map(|input| fetcher(input).boxed_local()));
        let inner = Rc::new(ResourceInner {
            rt: rt.clone(),
            status: Signal::new_in(rt, ResourceStatus::Idle),
            value: Signal::with_equals_in(rt, None, same_rc::<T>),
            error: Signal::with_equals_in(rt, None, same_rc::<E>),
            request: Cell::new(0),
            fetch,
            effect: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        let effect = Effect::new_in(rt, move || {
            if let Some(inner) = weak.upgrade() {
                inner.start();
            }
        });
        *inner.effect.borrow_mut() = Some(effect);
        Self { inner }
    }

    /// Current status. Tracked.
    pub fn status(&self) -> ResourceStatus {
        self.inner.status.get()
    }

    /// Whether a fetch is in flight. Tracked.
    pub fn loading(&self) -> bool {
        self.status() == ResourceStatus::Pending
    }

    /// The error of the latest failed fetch. Tracked.
    pub fn error(&self) -> Option<Rc<E>> {
        self.inner.error.get()
    }

    /// The latest successful value. Tracked.
    ///
    /// A failed or pending refetch keeps the previous value readable.
    pub fn get(&self) -> Option<Rc<T>> {
        self.inner.value.get()
    }

    /// The latest value without tracking.
    pub fn peek(&self) -> Option<Rc<T>> {
        self.inner.value.peek()
    }

    /// Fetch again with the current source value.
    pub fn refetch(&self) {
        let inner = &self.inner;
        inner.rt.untrack(|| inner.start());
    }

    /// Overwrite the value locally, e.g. for an optimistic update.
    ///
    /// A fetch already in flight still commits when it completes.
    pub fn mutate(&self, value: T) {
        let inner = &self.inner;
        inner.value.set(Some(Rc::new(value)));
        inner.error.set(None);
        inner.status.set(ResourceStatus::Ready);
    }
}

impl<T: 'static, E: 'static> Clone for Resource<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static, E: fmt::Debug + 'static> fmt::Debug for Resource<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("status", &self.inner.status.peek())
            .field("value", &self.inner.value.peek())
            .field("error", &self.inner.error.peek())
            .field("request", &self.inner.request.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
