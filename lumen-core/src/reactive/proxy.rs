//! Reactive objects.
//!
//! A [`ReactiveObject`] wraps a plain JSON-like map and gives every key its
//! own [`Signal`], created on first access. Effects that read `user.name`
//! re-run when `name` changes, not when an unrelated key does.
//!
//! Nested objects are wrapped recursively: the first read of a key holding a
//! JSON object moves that object into its own [`RawObject`] and wraps it.
//! Writes go through the per-key signal and are mirrored into the raw map
//! (and into the parent's raw map for nested objects), so [`raw`] always
//! reflects the current state.
//!
//! Wrapping the same [`RawObject`] twice returns the same proxy. The runtime
//! keeps a side table from the raw map's allocation address to a weak
//! reference to its proxy.
//!
//! Arrays are stored as plain values; replacing one is a change, mutating
//! one in place is not observable.
//!
//! [`raw`]: ReactiveObject::raw

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use super::equality::SameValue;
use super::runtime::Runtime;
use super::signal::Signal;

/// Shared, mutable JSON object that a [`ReactiveObject`] wraps.
pub type RawObject = Rc<RefCell<Map<String, Value>>>;

/// Build a [`RawObject`] from a map.
pub fn raw_object(map: Map<String, Value>) -> RawObject {
    Rc::new(RefCell::new(map))
}

/// The value behind one key.
#[derive(Clone, Debug)]
pub enum Field {
    Value(Value),
    Object(ReactiveObject),
}

impl Field {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Field::Value(value) => Some(value),
            Field::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ReactiveObject> {
        match self {
            Field::Object(object) => Some(object),
            Field::Value(_) => None,
        }
    }

    /// Plain JSON for this field. Nested objects are snapshotted with
    /// [`ReactiveObject::to_value`], so the read is tracked.
    pub fn into_value(self) -> Value {
        match self {
            Field::Value(value) => value,
            Field::Object(object) => object.to_value(),
        }
    }
}

impl SameValue for Field {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Field::Value(a), Field::Value(b)) => a == b,
            (Field::Object(a), Field::Object(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

fn address(raw: &RawObject) -> usize {
    Rc::as_ptr(raw) as *const () as usize
}

pub(crate) struct ObjectInner {
    runtime: Runtime,
    raw: RawObject,
    parent: Option<(Weak<ObjectInner>, String)>,
    fields: RefCell<HashMap<String, Signal<Field>>>,
    keys: Signal<u64>,
}

impl ObjectInner {
    /// Copy this object's raw map into the parent's entry, up to the root.
    fn mirror_into_parent(&self) {
        let Some((parent, key)) = &self.parent else {
            return;
        };
        let Some(parent) = parent.upgrade() else {
            return;
        };
        let snapshot = Value::Object(self.raw.borrow().clone());
        parent.raw.borrow_mut().insert(key.clone(), snapshot);
        parent.mirror_into_parent();
    }
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        if let Ok(mut proxies) = self.runtime.inner.proxies.try_borrow_mut() {
            proxies.remove(&address(&self.raw));
        }
    }
}

/// A JSON object whose keys are individually reactive.
///
/// # Example
///
/// ```rust,ignore
/// let user = reactive(raw_object(json!({ "name": "Ada" }).as_object().unwrap().clone()));
///
/// let u = user.clone();
/// create_effect(move || println!("{}", u.get_value("name")));
///
/// user.set("name", json!("Grace"));
/// ```
#[derive(Clone)]
pub struct ReactiveObject {
    inner: Rc<ObjectInner>,
}

impl ReactiveObject {
    fn wrap(runtime: &Runtime, raw: RawObject, parent: Option<(Weak<ObjectInner>, String)>) -> Self {
        let key = address(&raw);
        if let Some(existing) = runtime
            .inner
            .proxies
            .borrow()
            .get(&key)
            .and_then(Weak::upgrade)
        {
            return Self { inner: existing };
        }

        let inner = Rc::new(ObjectInner {
            runtime: runtime.clone(),
            raw,
            parent,
            fields: RefCell::new(HashMap::new()),
            keys: runtime.signal(0),
        });
        runtime
            .inner
            .proxies
            .borrow_mut()
            .insert(key, Rc::downgrade(&inner));
        Self { inner }
    }

    /// The wrapped map. Reflects every write made through the proxy.
    pub fn raw(&self) -> RawObject {
        Rc::clone(&self.inner.raw)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Whether both handles are the same proxy.
    pub fn ptr_eq(&self, other: &ReactiveObject) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn field_from(&self, key: &str, value: Value) -> Field {
        match value {
            Value::Object(map) => {
                let parent = Some((Rc::downgrade(&self.inner), key.to_string()));
                Field::Object(Self::wrap(&self.inner.runtime, raw_object(map), parent))
            }
            other => Field::Value(other),
        }
    }

    fn field_signal(&self, key: &str) -> Signal<Field> {
        if let Some(signal) = self.inner.fields.borrow().get(key) {
            return signal.clone();
        }

        let initial = self
            .inner
            .raw
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or(Value::Null);
        let field = self.field_from(key, initial);
        let signal = self.inner.runtime.signal(field);
        self.inner
            .fields
            .borrow_mut()
            .insert(key.to_string(), signal.clone());
        signal
    }

    /// Tracked read of one key. Absent keys read as `Value::Null`.
    pub fn get(&self, key: &str) -> Field {
        self.field_signal(key).get()
    }

    /// Tracked read of one key as plain JSON.
    pub fn get_value(&self, key: &str) -> Value {
        self.get(key).into_value()
    }

    /// Write one key. JSON objects are wrapped into nested proxies.
    pub fn set(&self, key: &str, value: Value) {
        let signal = self.field_signal(key);
        let is_new = self
            .inner
            .raw
            .borrow_mut()
            .insert(key.to_string(), value.clone())
            .is_none();
        self.inner.mirror_into_parent();

        signal.set(self.field_from(key, value));
        if is_new {
            self.inner.keys.update(|n| n + 1);
        }
    }

    /// Store an existing proxy under `key`.
    pub fn set_object(&self, key: &str, object: ReactiveObject) {
        let signal = self.field_signal(key);
        let snapshot = Value::Object(object.inner.raw.borrow().clone());
        let is_new = self
            .inner
            .raw
            .borrow_mut()
            .insert(key.to_string(), snapshot)
            .is_none();
        self.inner.mirror_into_parent();

        signal.set(Field::Object(object));
        if is_new {
            self.inner.keys.update(|n| n + 1);
        }
    }

    /// Remove a key. Readers of the key see `Value::Null`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.inner.raw.borrow_mut().remove(key)?;
        self.inner.mirror_into_parent();
        self.field_signal(key).set(Field::Value(Value::Null));
        self.inner.keys.update(|n| n + 1);
        Some(removed)
    }

    /// Current keys. Tracks key insertion and removal.
    pub fn keys(&self) -> Vec<String> {
        self.inner.keys.get();
        self.inner.raw.borrow().keys().cloned().collect()
    }

    /// Tracked snapshot of the whole object as plain JSON.
    pub fn to_value(&self) -> Value {
        let map = self
            .keys()
            .into_iter()
            .map(|key| {
                let value = self.get_value(&key);
                (key, value)
            })
            .collect();
        Value::Object(map)
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveObject")
            .field("raw", &self.inner.raw)
            .field("fields", &self.inner.fields.borrow().len())
            .finish()
    }
}

impl Runtime {
    /// Wrap `raw` in a reactive proxy, or return the proxy that already wraps
    /// it.
    pub fn reactive(&self, raw: RawObject) -> ReactiveObject {
        ReactiveObject::wrap(self, raw, None)
    }
}
