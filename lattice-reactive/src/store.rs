//! Reactive Stores
//!
//! A [`Store`] is a reactive record over a dynamic JSON tree. Instead of one
//! cell for the whole document, every path that is accessed gets its own
//! cells, created lazily and cached for the lifetime of the store:
//!
//! - the **value** cell, invalidated when the value at the path changes
//! - the **length** cell, invalidated when an array or object grows or shrinks
//! - the **iteration** cell, invalidated when the members are rewritten
//!
//! Reading `store.field("user").field("name")` depends only on that path,
//! so a write to `store.field("user").field("age")` does not wake it.
//!
//! # Writes
//!
//! A write replaces the value at its path, then invalidates the written
//! path, every ancestor, and every cached descendant whose value actually
//! differs. When the write has to create a missing member or retype an
//! ancestor (a scalar turning into an object, say), the diff starts at that
//! ancestor so its other cached children are checked too.
//!
//! Array methods do not diff the array. They notify the array's own cells
//! and only the cached elements at or after the first index they touched.
//!
//! Invalidation only flags and queues, so effects always observe the
//! finished write.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ReactiveError, Result};
use crate::reactive::{Runtime, Trigger};

static NULL: Value = Value::Null;

/// One step in a store path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, ".{key}"),
            PathSegment::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// Cells for one cached path.
struct StoreNode {
    value: Trigger,
    length: Trigger,
    iteration: Trigger,
    children: RefCell<IndexMap<PathSegment, Rc<StoreNode>>>,
}

impl StoreNode {
    fn new(rt: &Runtime) -> Self {
        Self {
            value: Trigger::new_in(rt),
            length: Trigger::new_in(rt),
            iteration: Trigger::new_in(rt),
            children: RefCell::new(IndexMap::new()),
        }
    }

    fn child(&self, rt: &Runtime, segment: PathSegment) -> Rc<StoreNode> {
        let mut children = self.children.borrow_mut();
        Rc::clone(
            children
                .entry(segment)
                .or_insert_with(|| Rc::new(StoreNode::new(rt))),
        )
    }

    /// Collect the cells of this node and its cached descendants where
    /// `old` and `new` differ.
    fn invalidate(&self, old: &Value, new: &Value, out: &mut Vec<Trigger>) {
        if old == new {
            return;
        }
        out.push(self.value.clone());
        if member_count(old) != member_count(new) {
            out.push(self.length.clone());
        }
        if is_container(old) || is_container(new) {
            out.push(self.iteration.clone());
        }
        for (segment, node) in self.children.borrow().iter() {
            let old = step(old, segment).unwrap_or(&NULL);
            let new = step(new, segment).unwrap_or(&NULL);
            node.invalidate(old, new, out);
        }
    }

    /// Collect the cells touched by replacing `items[start..start + removed.len()]`
    /// with `inserted` elements. `items` is the array after the splice.
    fn invalidate_splice(
        &self,
        items: &[Value],
        start: usize,
        removed: &[Value],
        inserted: usize,
        out: &mut Vec<Trigger>,
    ) {
        let old_len = items.len() + removed.len() - inserted;
        out.push(self.value.clone());
        out.push(self.iteration.clone());
        if old_len != items.len() {
            out.push(self.length.clone());
        }
        for (segment, node) in self.children.borrow().iter() {
            let PathSegment::Index(index) = *segment else {
                continue;
            };
            if index < start {
                continue;
            }
            let old = if index >= old_len {
                None
            } else if index < start + removed.len() {
                removed.get(index - start)
            } else {
                items.get(index - removed.len() + inserted)
            };
            node.invalidate(old.unwrap_or(&NULL), items.get(index).unwrap_or(&NULL), out);
        }
    }
}

struct StoreRoot {
    rt: Runtime,
    data: RefCell<Value>,
}

/// A reactive view of one path in a JSON document.
///
/// ```rust
/// use lattice_reactive::Store;
/// use serde_json::json;
///
/// let store = Store::new(json!({ "todos": [] }));
/// let todos = store.field("todos");
/// todos.push(json!({ "title": "write docs", "done": false }));
/// assert_eq!(todos.len(), 1);
/// assert_eq!(todos.index(0).field("title").get(), json!("write docs"));
/// ```
#[derive(Clone)]
pub struct Store {
    root: Rc<StoreRoot>,
    path: Vec<PathSegment>,
    /// Cached nodes from the root down to this path.
    chain: Vec<Rc<StoreNode>>,
}

impl Store {
    /// Create a store on the current runtime.
    pub fn new(value: Value) -> Self {
        Self::new_in(&Runtime::current(), value)
    }

    /// Create a store on `rt`.
    pub fn new_in(rt: &Runtime, value: Value) -> Self {
        Self {
            root: Rc::new(StoreRoot {
                rt: rt.clone(),
                data: RefCell::new(value),
            }),
            path: Vec::new(),
            chain: vec![Rc::new(StoreNode::new(rt))],
        }
    }

    /// Create a store from any serializable value.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(ReactiveError::Store)?;
        Ok(Self::new(value))
    }

    fn node(&self) -> &StoreNode {
        self.chain
            .last()
            .expect("store chain always holds the root node")
    }

    fn descend(&self, segment: PathSegment) -> Store {
        let child = self.node().child(&self.root.rt, segment.clone());
        let mut path = self.path.clone();
        path.push(segment);
        let mut chain = self.chain.clone();
        chain.push(child);
        Store {
            root: Rc::clone(&self.root),
            path,
            chain,
        }
    }

    /// The store for an object member of this path.
    pub fn field(&self, key: impl Into<String>) -> Store {
        self.descend(PathSegment::Key(key.into()))
    }

    /// The store for an array element of this path.
    pub fn index(&self, index: usize) -> Store {
        self.descend(PathSegment::Index(index))
    }

    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    /// The path in `a.b[0]` notation.
    pub fn path_string(&self) -> String {
        self.path.iter().map(ToString::to_string).collect()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Borrow the value at this path, tracking it. Missing paths read as
    /// `null`.
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        self.node().value.track();
        self.peek_with(f)
    }

    /// Borrow the value at this path without tracking.
    pub fn peek_with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        let data = self.root.data.borrow();
        f(resolve(&data, &self.path).unwrap_or(&NULL))
    }

    /// Clone the value at this path, tracking it.
    pub fn get(&self) -> Value {
        self.with(Value::clone)
    }

    /// Clone the value at this path without tracking.
    pub fn peek(&self) -> Value {
        self.peek_with(Value::clone)
    }

    /// Deserialize the value at this path, tracking it.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.with(|value| T::deserialize(value).map_err(ReactiveError::Store))
    }

    /// Whether a value exists at this path, tracking it.
    pub fn exists(&self) -> bool {
        self.node().value.track();
        resolve(&self.root.data.borrow(), &self.path).is_some()
    }

    /// Number of array elements or object members, tracking only the
    /// length.
    pub fn len(&self) -> usize {
        self.node().length.track();
        self.peek_with(member_count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores for every element of an array path, tracking the iteration
    /// cell. Non-arrays yield nothing.
    pub fn items(&self) -> Vec<Store> {
        let node = self.node();
        node.iteration.track();
        node.length.track();
        let count = self.peek_with(|value| value.as_array().map_or(0, Vec::len));
        (0..count).map(|index| self.index(index)).collect()
    }

    /// Member names of an object path, tracking the iteration cell.
    pub fn keys(&self) -> Vec<String> {
        self.node().iteration.track();
        self.peek_with(|value| {
            value
                .as_object()
                .map(|members| members.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Replace the value at this path. Missing parents are created.
    /// Returns whether anything changed.
    pub fn set(&self, value: impl Into<Value>) -> bool {
        let value = value.into();
        self.write(|slot| *slot = value).1
    }

    /// Serialize `value` and store it at this path.
    pub fn set_as<T: Serialize>(&self, value: &T) -> Result<bool> {
        let value = serde_json::to_value(value).map_err(ReactiveError::Store)?;
        Ok(self.set(value))
    }

    /// Mutate the value at this path in place.
    pub fn update(&self, f: impl FnOnce(&mut Value)) -> bool {
        self.write(f).1
    }

    /// Append to the array at this path.
    pub fn push(&self, value: impl Into<Value>) {
        self.splice_values(usize::MAX, 0, vec![value.into()]);
    }

    /// Remove and return the last element of the array at this path.
    pub fn pop(&self) -> Option<Value> {
        let len = self.peek_with(|value| value.as_array().map_or(0, Vec::len));
        let start = len.checked_sub(1)?;
        self.splice_values(start, 1, Vec::new()).pop()
    }

    /// Insert into the array at this path, clamping `index` to its length.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        self.splice_values(index, 0, vec![value.into()]);
    }

    /// Remove the element at `index`, if there is one.
    pub fn remove(&self, index: usize) -> Option<Value> {
        self.splice_values(index, 1, Vec::new()).pop()
    }

    /// Replace `delete` elements starting at `start` with `values`,
    /// returning the removed elements. Out-of-range bounds are clamped.
    pub fn splice<I>(&self, start: usize, delete: usize, values: I) -> Vec<Value>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.splice_values(start, delete, values.into_iter().map(Into::into).collect())
    }

    /// Remove every element of the array at this path.
    pub fn clear(&self) {
        self.splice_values(0, usize::MAX, Vec::new());
    }

    /// Run `f` on the value at this path and invalidate what changed.
    ///
    /// The diff starts at the shallowest ancestor the write reshapes: the
    /// first one that is the wrong kind of container for the next segment or
    /// lacks the member. Ancestors above it only have their value cell
    /// notified.
    fn write<R>(&self, f: impl FnOnce(&mut Value) -> R) -> (R, bool) {
        let mut touched = Vec::new();
        let (result, pivot) = {
            let mut data = self.root.data.borrow_mut();
            let pivot = reshape_depth(&data, &self.path);
            let base = resolve_mut(&mut data, &self.path[..pivot])
                .expect("paths above the reshaped ancestor exist");
            let old = base.clone();
            let result = f(resolve_or_create(base, &self.path[pivot..]));
            self.chain[pivot].invalidate(&old, base, &mut touched);
            (result, pivot)
        };
        let changed = !touched.is_empty();
        if changed {
            tracing::trace!(path = %self.path_string(), cells = touched.len(), "store write");
            self.notify(&self.chain[..pivot], touched);
        }
        (result, changed)
    }

    /// Splice the array at this path without diffing it. A non-array is
    /// replaced by `values` as a new array.
    fn splice_values(&self, start: usize, delete: usize, values: Vec<Value>) -> Vec<Value> {
        if !self.peek_with(Value::is_array) {
            self.write(|slot| *slot = Value::Array(values));
            return Vec::new();
        }
        let mut touched = Vec::new();
        let removed = {
            let mut data = self.root.data.borrow_mut();
            let items = resolve_mut(&mut data, &self.path)
                .and_then(Value::as_array_mut)
                .expect("path holds an array");
            let start = start.min(items.len());
            let end = start.saturating_add(delete).min(items.len());
            let inserted = values.len();
            let removed: Vec<Value> = items.splice(start..end, values).collect();
            let unchanged = removed.len() == inserted && removed[..] == items[start..start + inserted];
            if !unchanged {
                self.node()
                    .invalidate_splice(items, start, &removed, inserted, &mut touched);
            }
            removed
        };
        if !touched.is_empty() {
            tracing::trace!(path = %self.path_string(), cells = touched.len(), "store splice");
            self.notify(&self.chain[..self.chain.len() - 1], touched);
        }
        removed
    }

    /// Notify the value cells of `ancestors`, nearest first, then `touched`.
    fn notify(&self, ancestors: &[Rc<StoreNode>], touched: Vec<Trigger>) {
        for ancestor in ancestors.iter().rev() {
            ancestor.value.notify();
        }
        for cell in touched {
            cell.notify();
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path_string())
            .field("value", &self.peek())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Path helpers
// ----------------------------------------------------------------------------

fn step<'v>(value: &'v Value, segment: &PathSegment) -> Option<&'v Value> {
    match (value, segment) {
        (Value::Object(members), PathSegment::Key(key)) => members.get(key),
        (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
        _ => None,
    }
}

fn resolve<'v>(mut value: &'v Value, path: &[PathSegment]) -> Option<&'v Value> {
    for segment in path {
        value = step(value, segment)?;
    }
    Some(value)
}

fn resolve_mut<'v>(mut value: &'v mut Value, path: &[PathSegment]) -> Option<&'v mut Value> {
    for segment in path {
        value = match (value, segment) {
            (Value::Object(members), PathSegment::Key(key)) => members.get_mut(key)?,
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Depth of the first value on `path` that a write must reshape, or the
/// path length if every step already exists.
fn reshape_depth(mut value: &Value, path: &[PathSegment]) -> usize {
    for (depth, segment) in path.iter().enumerate() {
        match step(value, segment) {
            Some(next) => value = next,
            None => return depth,
        }
    }
    path.len()
}

/// Walk `path`, replacing anything in the way with the container the next
/// segment needs and padding arrays with `null`.
fn resolve_or_create<'v>(mut value: &'v mut Value, path: &[PathSegment]) -> &'v mut Value {
    for segment in path {
        value = match segment {
            PathSegment::Key(key) => {
                if !value.is_object() {
                    *value = Value::Object(Map::new());
                }
                value
                    .as_object_mut()
                    .expect("value was just made an object")
                    .entry(key.clone())
                    .or_insert(Value::Null)
            }
            PathSegment::Index(index) => {
                if !value.is_array() {
                    *value = Value::Array(Vec::new());
                }
                let items = value
                    .as_array_mut()
                    .expect("value was just made an array");
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                &mut items[*index]
            }
        };
    }
    value
}

fn member_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(members) => members.len(),
        _ => 0,
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use serde::Deserialize;
    use serde_json::json;
    use std::cell::Cell;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default())
    }

    fn watch(rt: &Runtime, read: impl Fn() + 'static) -> Rc<Cell<u32>> {
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let _effect = rt.effect(move || {
            read();
            counter.set(counter.get() + 1);
        });
        runs
    }

    #[test]
    fn sibling_writes_do_not_wake_each_other() {
        let rt = runtime();
        let store = Store::new_in(&rt, json!({ "name": "Ada", "age": 36 }));
        let name_runs = {
            let name = store.field("name");
            watch(&rt, move || {
                name.get();
            })
        };
        let root_runs = {
            let store = store.clone();
            watch(&rt, move || {
                store.get();
            })
        };

        store.field("age").set(37);
        rt.flush().unwrap();
        assert_eq!(name_runs.get(), 1);
        assert_eq!(root_runs.get(), 2);

        store.field("name").set("Grace");
        rt.flush().unwrap();
        assert_eq!(name_runs.get(), 2);
        assert_eq!(store.field("name").peek(), json!("Grace"));
    }

    #[test]
    fn replacing_a_parent_wakes_changed_children_only() {
        let rt = runtime();
        let store = Store::new_in(&rt, json!({ "user": { "name": "Ada", "age": 36 } }));
        let user = store.field("user");
        let name_runs = {
            let name = user.field("name");
            watch(&rt, move || {
                name.get();
            })
        };
        let age_runs = {
            let age = user.field("age");
            watch(&rt, move || {
                age.get();
            })
        };

        user.set(json!({ "name": "Ada", "age": 37 }));
        rt.flush().unwrap();
        assert_eq!(name_runs.get(), 1);
        assert_eq!(age_runs.get(), 2);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let rt = runtime();
        let store = Store::new_in(&rt, json!({ "a": 1 }));
        assert!(!store.field("a").set(1));
        assert!(store.field("a").set(2));
    }

    #[test]
    fn array_methods_bump_length_and_iteration() {
        let rt = runtime();
        let store = Store::new_in(&rt, json!({ "items": [1, 2, 3] }));
        let items = store.field("items");
        let len_runs = {
            let items = items.clone();
            watch(&rt, move || {
                items.len();
            })
        };
        let first_runs = {
            let first = items.index(0);
            watch(&rt, move || {
                first.get();
            })
        };

        items.push(4);
        rt.flush().unwrap();
        assert_eq!(len_runs.get(), 2);
        assert_eq!(first_runs.get(), 1);

        assert_eq!(items.remove(0), Some(json!(1)));
        rt.flush().unwrap();
        assert_eq!(len_runs.get(), 3);
        assert_eq!(first_runs.get(), 2);
        assert_eq!(items.index(0).peek(), json!(2));

        let removed = items.splice(1, 1, [json!(30), json!(31)]);
        assert_eq!(removed, vec![json!(3)]);
        assert_eq!(items.peek(), json!([2, 30, 31, 4]));

        assert_eq!(items.pop(), Some(json!(4)));
        items.insert(0, 1);
        assert_eq!(items.peek(), json!([1, 2, 30, 31]));

        items.clear();
        assert!(items.is_empty());
    }

    #[test]
    fn retyping_an_ancestor_wakes_its_cached_children() {
        let rt = runtime();
        let store = Store::new_in(&rt, json!({ "a": [1, 2] }));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _effect = {
            let (first, seen) = (store.field("a").index(0), seen.clone());
            rt.effect(move || seen.borrow_mut().push(first.get()))
        };

        store.field("a").field("b").set(1);
        rt.flush().unwrap();
        assert_eq!(store.peek(), json!({ "a": { "b": 1 } }));
        assert_eq!(*seen.borrow(), vec![json!(1), Value::Null]);
    }

    #[test]
    fn creating_a_member_wakes_the_parent_length() {
        let rt = runtime();
        let store = Store::new_in(&rt, json!({ "user": { "name": "Ada" } }));
        let user = store.field("user");
        let len_runs = {
            let user = user.clone();
            watch(&rt, move || {
                user.len();
            })
        };
        let name_runs = {
            let name = user.field("name");
            watch(&rt, move || {
                name.get();
            })
        };

        user.field("age").set(36);
        rt.flush().unwrap();
        assert_eq!(len_runs.get(), 2);
        assert_eq!(name_runs.get(), 1);
    }

    #[test]
    fn array_methods_only_touch_shifted_elements() {
        let rt = runtime();
        let store = Store::new_in(&rt, json!([{ "title": "a" }, { "title": "b" }]));
        let first_runs = {
            let first = store.index(0).field("title");
            watch(&rt, move || {
                first.get();
            })
        };
        let second_runs = {
            let second = store.index(1).field("title");
            watch(&rt, move || {
                second.get();
            })
        };

        for n in 0..50 {
            store.push(json!({ "title": n }));
        }
        rt.flush().unwrap();
        assert_eq!(first_runs.get(), 1);
        assert_eq!(second_runs.get(), 1);

        store.insert(1, json!({ "title": "between" }));
        rt.flush().unwrap();
        assert_eq!(first_runs.get(), 1);
        assert_eq!(second_runs.get(), 2);
        assert_eq!(store.index(1).field("title").peek(), json!("between"));

        // Replacing an element with an equal one changes nothing.
        store.splice(0, 1, [json!({ "title": "a" })]);
        rt.flush().unwrap();
        assert_eq!(first_runs.get(), 1);
        assert_eq!(rt.pending_effects(), 0);
    }

    #[test]
    fn items_tracks_iteration() {
        let rt = runtime();
        let store = Store::new_in(&rt, json!([]));
        let seen = Rc::new(Cell::new(0));
        let _effect = {
            let (store, seen) = (store.clone(), seen.clone());
            rt.effect(move || seen.set(store.items().len()))
        };

        store.push("a");
        store.push("b");
        rt.flush().unwrap();
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn missing_paths_are_created_on_write() {
        let rt = runtime();
        let store = Store::new_in(&rt, json!({}));
        let deep = store.field("a").field("b").index(2);
        assert!(!deep.exists());
        assert_eq!(deep.peek(), Value::Null);

        deep.set(true);
        assert_eq!(store.peek(), json!({ "a": { "b": [null, null, true] } }));
        assert_eq!(deep.path_string(), ".a.b[2]");
        assert_eq!(store.keys(), vec!["a".to_string()]);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        font_size: u32,
    }

    #[test]
    fn typed_access_round_trips_through_serde() {
        let rt = runtime();
        let _guard = rt.enter();
        let store = Store::from_serialize(&Settings {
            theme: "dark".into(),
            font_size: 14,
        })
        .unwrap();

        store.field("font_size").set(16);
        let settings: Settings = store.get_as().unwrap();
        assert_eq!(settings.font_size, 16);

        assert!(matches!(
            store.field("theme").get_as::<u32>(),
            Err(ReactiveError::Store(_))
        ));
    }
}
