//! Integration Tests for the Reactive Kernel
//!
//! These tests verify that signals, computeds, effects, owners and the
//! wrapper layer work together through the public API only.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use lattice_reactive::{
    on_cleanup, root_in, Effect, ListHost, MappedList, Owner, ReactiveError, Resource,
    ResourceStatus, Runtime, RuntimeConfig, Store,
};
use serde_json::json;

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default())
}

fn counter() -> Rc<Cell<u32>> {
    Rc::new(Cell::new(0))
}

/// Writes to several dependencies in one cycle run a dependent once.
#[test]
fn coalescing_law() {
    let rt = runtime();
    let a = rt.signal(1);
    let b = rt.signal(2);
    let c = rt.signal(3);

    let evaluations = counter();
    let sum = {
        let (a, b, c, evaluations) = (a.clone(), b.clone(), c.clone(), evaluations.clone());
        rt.computed(move || {
            evaluations.set(evaluations.get() + 1);
            a.get() + b.get() + c.get()
        })
    };
    let effect = {
        let sum = sum.clone();
        rt.effect(move || {
            sum.get();
        })
    };
    assert_eq!(evaluations.get(), 1);

    a.set(10);
    b.set(20);
    c.set(30);
    a.set(11);
    rt.flush().unwrap();

    assert_eq!(effect.run_count(), 2);
    assert_eq!(evaluations.get(), 2);
    assert_eq!(sum.get(), 61);
}

/// One write to the top of a diamond runs the bottom once.
#[test]
fn diamond_law() {
    let rt = runtime();
    let s = rt.signal(1);
    let b = {
        let s = s.clone();
        rt.computed(move || s.get() + 1)
    };
    let c = {
        let s = s.clone();
        rt.computed(move || s.get() * 10)
    };
    let runs = counter();
    let d = {
        let (b, c, runs) = (b.clone(), c.clone(), runs.clone());
        rt.computed(move || {
            runs.set(runs.get() + 1);
            b.get() + c.get()
        })
    };

    assert_eq!(d.get(), 12);
    s.set(2);
    assert_eq!(d.get(), 23);
    assert_eq!(runs.get(), 2);
}

/// Writing an equal value notifies nobody.
#[test]
fn no_op_write_law() {
    let rt = runtime();
    let name = rt.signal(String::from("ada"));
    let evaluations = counter();
    let upper = {
        let (name, evaluations) = (name.clone(), evaluations.clone());
        rt.computed(move || {
            evaluations.set(evaluations.get() + 1);
            name.get().to_uppercase()
        })
    };
    let effect = {
        let upper = upper.clone();
        rt.effect(move || {
            upper.get();
        })
    };
    let version = name.version();

    assert!(!name.set(String::from("ada")));
    assert_eq!(name.version(), version);
    assert_eq!(rt.pending_effects(), 0);
    rt.flush().unwrap();

    assert_eq!(effect.run_count(), 1);
    assert_eq!(evaluations.get(), 1);
}

/// An effect stops hearing a cell its last run did not read.
#[test]
fn dynamic_dependency_law() {
    let rt = runtime();
    let show = rt.signal(true);
    let detail = rt.signal(0);
    let effect = {
        let (show, detail) = (show.clone(), detail.clone());
        rt.effect(move || {
            if show.get() {
                detail.get();
            }
        })
    };

    show.set(false);
    rt.flush().unwrap();
    assert_eq!(effect.run_count(), 2);

    detail.set(1);
    detail.set(2);
    rt.flush().unwrap();
    assert_eq!(effect.run_count(), 2);
    assert_eq!(detail.subscriber_count(), 0);

    show.set(true);
    rt.flush().unwrap();
    detail.set(3);
    rt.flush().unwrap();
    assert_eq!(effect.run_count(), 4);
}

/// Untracked reads never create edges.
#[test]
fn peek_isolation_law() {
    let rt = runtime();
    let tracked = rt.signal(0);
    let peeked = rt.signal(0);
    let effect = {
        let (tracked, peeked) = (tracked.clone(), peeked.clone());
        rt.effect(move || {
            tracked.get();
            peeked.peek();
            lattice_reactive::untrack(|| peeked.get());
        })
    };

    assert_eq!(peeked.subscriber_count(), 0);
    peeked.set(1);
    rt.flush().unwrap();
    assert_eq!(effect.run_count(), 1);

    tracked.set(1);
    rt.flush().unwrap();
    assert_eq!(effect.run_count(), 2);
}

/// Cleanups run newest first, on re-run and on disposal.
#[test]
fn cleanup_ordering_law() {
    let rt = runtime();
    let source = rt.signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));
    let effect = {
        let (source, log) = (source.clone(), log.clone());
        rt.effect(move || {
            source.get();
            for name in ["C1", "C2", "C3"] {
                let log = log.clone();
                on_cleanup(move || log.borrow_mut().push(name)).unwrap();
            }
        })
    };

    source.set(1);
    rt.flush().unwrap();
    assert_eq!(*log.borrow(), ["C3", "C2", "C1"]);

    effect.dispose();
    assert_eq!(*log.borrow(), ["C3", "C2", "C1", "C3", "C2", "C1"]);
}

/// A batch runs its dependents once, after every write landed.
#[test]
fn batch_scenario() {
    let rt = runtime();
    let a = rt.signal(1);
    let b = rt.signal(2);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let count = counter();
    let _effect = {
        let (a, b, seen, count) = (a.clone(), b.clone(), seen.clone(), count.clone());
        rt.effect(move || {
            seen.borrow_mut().push((a.get(), b.get()));
            count.set(count.get() + 1);
        })
    };
    assert_eq!(count.get(), 1);

    rt.sync(|| {
        a.set(10);
        b.set(20);
    });

    assert_eq!(count.get(), 2);
    assert_eq!(*seen.borrow(), [(1, 2), (10, 20)]);
}

/// Nested batches flush once, when the outermost one closes.
#[test]
fn nested_batches_flush_at_the_outermost() {
    let rt = runtime();
    let a = rt.signal(0);
    let runs = counter();
    let _effect = {
        let (a, runs) = (a.clone(), runs.clone());
        rt.effect(move || {
            a.get();
            runs.set(runs.get() + 1);
        })
    };

    rt.sync(|| {
        a.set(1);
        rt.sync(|| a.set(2));
        assert_eq!(runs.get(), 1);
        a.set(3);
    });
    assert_eq!(runs.get(), 2);
}

#[derive(Default)]
struct LabelHost {
    labels: Vec<String>,
    removed: Vec<String>,
}

impl ListHost for LabelHost {
    type Node = String;

    fn insert_before(&mut self, node: &String, anchor: Option<&String>) {
        self.labels.retain(|label| label != node);
        let at = anchor
            .and_then(|anchor| self.labels.iter().position(|label| label == anchor))
            .unwrap_or(self.labels.len());
        self.labels.insert(at, node.clone());
    }

    fn remove(&mut self, node: &String) {
        self.labels.retain(|label| label != node);
        self.removed.push(node.clone());
    }
}

/// Removing the first of three keyed items touches only that item.
#[test]
fn keyed_reconciliation_scenario() {
    let rt = runtime();
    let items = rt.signal(vec!["a", "b", "c"]);
    let created = counter();
    let disposed = counter();
    let list = {
        let (items, created, disposed) = (items.clone(), created.clone(), disposed.clone());
        MappedList::keyed_in(
            &rt,
            move || items.get(),
            |item| *item,
            move |item, _index| {
                created.set(created.get() + 1);
                let disposed = disposed.clone();
                Owner::current()
                    .expect("entries are mapped under an owner")
                    .on_dispose(move || disposed.set(disposed.get() + 1));
                item.peek().to_string()
            },
        )
    };
    let mount = list.mount(LabelHost::default());

    items.set(vec!["b", "c"]);
    rt.flush().unwrap();

    assert_eq!(disposed.get(), 1);
    assert_eq!(created.get(), 3);
    assert_eq!(mount.host().labels, ["b", "c"]);
    assert_eq!(mount.host().removed, ["a"]);
}

/// A self-incrementing effect settles after four runs.
#[test]
fn re_entrant_effect_scenario() {
    let rt = runtime();
    let value = rt.signal(0);
    let effect = {
        let value = value.clone();
        rt.effect(move || {
            let current = value.get();
            if current < 3 {
                value.set(current + 1);
            }
        })
    };

    rt.flush().unwrap();
    assert_eq!(effect.run_count(), 4);
    assert_eq!(value.peek(), 3);
    assert_eq!(rt.pending_effects(), 0);
}

/// Only the latest fetch commits.
#[tokio::test]
async fn resource_race_scenario() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let rt = runtime();
            rt.set_task_spawner(Some(lattice_reactive::tokio_tasks()));
            let (slow_tx, slow_rx) = tokio::sync::oneshot::channel::<&'static str>();
            let (fast_tx, fast_rx) = tokio::sync::oneshot::channel::<&'static str>();
            let pending = RefCell::new(VecDeque::from([slow_rx, fast_rx]));
            let resource = Resource::new_in(&rt, move || {
                let rx = pending.borrow_mut().pop_front();
                async move {
                    match rx {
                        Some(rx) => rx.await.map_err(|err| err.to_string()),
                        None => Err("no request".to_string()),
                    }
                }
            });
            assert!(resource.loading());
            resource.refetch();

            fast_tx.send("fast").unwrap();
            slow_tx.send("slow").unwrap();
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }

            assert_eq!(resource.status(), ResourceStatus::Ready);
            assert_eq!(resource.get().as_deref(), Some(&"fast"));
        })
        .await;
}

/// With a tokio spawner installed, effects flush on their own.
#[tokio::test]
async fn microtask_spawner_flushes_automatically() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let rt = runtime();
            rt.set_microtask_spawner(Some(lattice_reactive::tokio_microtasks()));
            let a = rt.signal(0);
            let b = rt.signal(0);
            let runs = counter();
            let _effect = {
                let (a, b, runs) = (a.clone(), b.clone(), runs.clone());
                rt.effect(move || {
                    a.get();
                    b.get();
                    runs.set(runs.get() + 1);
                })
            };

            a.set(1);
            b.set(1);
            assert_eq!(runs.get(), 1);

            for _ in 0..5 {
                tokio::task::yield_now().await;
            }
            assert_eq!(runs.get(), 2);
            assert_eq!(rt.pending_effects(), 0);
        })
        .await;
}

/// Disposing a root tears down everything created in it.
#[test]
fn root_disposal_cascades() {
    let rt = runtime();
    let source = rt.signal(0);
    let (outer, inner, disposer) = root_in(&rt, |disposer| {
        let source = source.clone();
        let outer = rt.effect({
            let source = source.clone();
            move || {
                source.get();
            }
        });
        let inner = root_in(&rt, |_| {
            rt.effect(move || {
                source.get();
            })
        });
        (outer, inner, disposer)
    });
    assert_eq!(source.subscriber_count(), 2);

    disposer.dispose();
    assert!(outer.is_disposed());
    assert!(inner.is_disposed());
    assert_eq!(source.subscriber_count(), 0);
}

/// Sibling store paths do not wake each other.
#[test]
fn store_paths_are_isolated() {
    let rt = runtime();
    let store = Store::new_in(&rt, json!({ "user": { "name": "ada", "age": 36 } }));
    let name_runs = counter();
    let _effect = {
        let (name, name_runs) = (store.field("user").field("name"), name_runs.clone());
        rt.effect(move || {
            name.get();
            name_runs.set(name_runs.get() + 1);
        })
    };

    store.field("user").field("age").set(37);
    rt.flush().unwrap();
    assert_eq!(name_runs.get(), 1);

    store.field("user").field("name").set("grace");
    rt.flush().unwrap();
    assert_eq!(name_runs.get(), 2);
}

/// Effects that keep spawning nested effects hit the depth guard.
#[cfg(debug_assertions)]
#[test]
fn depth_guard_reports_runaway_nesting() {
    fn nest(rt: &Runtime, level: u32, errors: Rc<RefCell<Vec<ReactiveError>>>) -> Effect {
        let (inner_rt, inner_errors) = (rt.clone(), errors.clone());
        Effect::with_handler_in(
            rt,
            move || {
                if level < 10 {
                    nest(&inner_rt, level + 1, inner_errors.clone());
                }
            },
            move |err| errors.borrow_mut().push(err),
        )
    }

    let rt = Runtime::new(RuntimeConfig::default().with_max_effect_depth(3));
    let errors = Rc::new(RefCell::new(Vec::new()));
    let _effect = nest(&rt, 0, errors.clone());

    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ReactiveError::DepthExceeded { limit: 3 }));
}

/// An effect that re-triggers itself forever trips the flush guard.
#[cfg(debug_assertions)]
#[test]
fn flush_guard_stops_endless_loops() {
    let rt = Runtime::new(RuntimeConfig::default().with_max_flush_iterations(10));
    let value = rt.signal(0u32);
    let effect = {
        let value = value.clone();
        rt.effect(move || {
            let current = value.get();
            value.set(current + 1);
        })
    };

    let result = rt.flush();
    assert!(matches!(result, Err(ReactiveError::FlushLimit { limit: 10 })));
    assert_eq!(rt.pending_effects(), 0);

    effect.dispose();
    assert!(rt.flush().is_ok());
}
