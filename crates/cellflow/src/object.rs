#![forbid(unsafe_code)]

//! Shared, identity-bearing records.
//!
//! An [`Object`] is the Rust stand-in for a plain mutable object used as a
//! cell value. Clones share the same fields, so a mutation through any handle
//! is visible through every other handle and every cell holding the object.
//!
//! # Field events
//!
//! [`Object::insert`] and [`Object::remove`] deliver a synchronous change
//! event to every listener registered for the affected key. Listeners are
//! stored as `Weak` callbacks and pruned lazily during delivery; the
//! registration stays alive for as long as the returned [`Watch`] does.
//!
//! # Bound property cells
//!
//! Each object also remembers (weakly) which property cells currently read
//! each of its fields. Two cells holding the same object have their own
//! property cells, and a change deep inside a field reaches every cell bound
//! to that field through this list.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::cell::{Cell, CellInner};
use crate::observe::Watch;
use crate::value::Value;

type FieldCallback = dyn Fn();

struct FieldListener {
    key: String,
    callback: Weak<FieldCallback>,
}

#[derive(Default)]
struct ObjectInner {
    fields: RefCell<BTreeMap<String, Value>>,
    listeners: RefCell<Vec<FieldListener>>,
    bound: RefCell<AHashMap<String, Vec<Weak<CellInner>>>>,
}

/// A shared record of named fields.
#[derive(Clone, Default)]
pub struct Object {
    inner: Rc<ObjectInner>,
}

impl Object {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, or `Undefined` when absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        self.inner
            .fields
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.borrow().contains_key(key)
    }

    /// Assign a field and notify listeners of `key` when the value changed.
    /// Returns the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        let previous = self
            .inner
            .fields
            .borrow_mut()
            .insert(key.clone(), value.clone());
        if previous.as_ref() != Some(&value) {
            self.emit(&key);
        }
        previous
    }

    /// Delete a field, notifying listeners of `key` if it existed.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let previous = self.inner.fields.borrow_mut().remove(key);
        if previous.is_some() {
            self.emit(key);
        }
        previous
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    /// Snapshot of all fields in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .fields
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.fields.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.fields.borrow().is_empty()
    }

    /// Whether both handles refer to the same record.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register `callback` for changes to `key`. Dropping the returned
    /// [`Watch`] ends the registration.
    #[must_use]
    pub fn watch_field(&self, key: &str, callback: Rc<FieldCallback>) -> Watch {
        self.inner.listeners.borrow_mut().push(FieldListener {
            key: key.to_string(),
            callback: Rc::downgrade(&callback),
        });
        Watch::holding(callback)
    }

    /// Number of live field listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .borrow()
            .iter()
            .filter(|listener| listener.callback.strong_count() > 0)
            .count()
    }

    fn emit(&self, key: &str) {
        // Collect first: callbacks may mutate this object again.
        let callbacks: Vec<Rc<FieldCallback>> = {
            let mut listeners = self.inner.listeners.borrow_mut();
            listeners.retain(|listener| listener.callback.strong_count() > 0);
            listeners
                .iter()
                .filter(|listener| listener.key == key)
                .filter_map(|listener| listener.callback.upgrade())
                .collect()
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Live property cells currently bound to `key`.
    pub(crate) fn bound_cells(&self, key: &str) -> Vec<Cell> {
        self.inner
            .bound
            .borrow()
            .get(key)
            .map(|cells| cells.iter().filter_map(Weak::upgrade).map(Cell::from_inner).collect())
            .unwrap_or_default()
    }

    pub(crate) fn bind_cell(&self, key: &str, cell: &Cell) {
        let target = cell.downgrade();
        let mut bound = self.inner.bound.borrow_mut();
        let cells = bound.entry(key.to_string()).or_default();
        cells.retain(|weak| weak.strong_count() > 0);
        if !cells.iter().any(|weak| weak.ptr_eq(&target)) {
            cells.push(target);
        }
    }

    pub(crate) fn unbind_cell(&self, key: &str, cell: &Cell) {
        let target = cell.downgrade();
        let mut bound = self.inner.bound.borrow_mut();
        if let Some(cells) = bound.get_mut(key) {
            cells.retain(|weak| weak.strong_count() > 0 && !weak.ptr_eq(&target));
            if cells.is_empty() {
                bound.remove(key);
            }
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let fields = iter
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self {
            inner: Rc::new(ObjectInner {
                fields: RefCell::new(fields),
                ..ObjectInner::default()
            }),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}
