#![forbid(unsafe_code)]

//! Property cells.
//!
//! `cell.property("a")` is a cell bound to field `a` of whatever object the
//! parent cell holds. The parent owns it, and it reads the parent without
//! depending on it. The parent reaches its property cells directly when it
//! changes, and a property cell that changes notifies its parent's observers
//! without disturbing the parent's other properties.
//!
//! Field changes made directly on an [`Object`] (not through a cell) reach
//! the property cell through the installed
//! [`ChangeObserver`](crate::ChangeObserver).
//!
//! # Identity
//!
//! A parent hands out one property cell per key while that cell is alive, and
//! that cell always follows the parent's current value. Property cells of
//! different parents that read the same `(object, key)` are bound to each
//! other through the object: a change inside the field notifies all of them.

use std::rc::{Rc, Weak};

use crate::cell::{Cell, CellInner, Kind};
use crate::derive::flatten;
use crate::error::{CellError, Result};
use crate::object::Object;
use crate::propagate::{self, Reach};
use crate::runtime;
use crate::value::Value;

impl Cell {
    /// The cell for field `key` of this cell's value.
    pub fn property(&self, key: impl Into<String>) -> Cell {
        let key = key.into();
        let mut children = self.inner.children.borrow_mut();
        children
            .entry(key.clone())
            .or_insert_with(|| {
                Cell::with_kind(Kind::Property {
                    parent: self.downgrade(),
                    key,
                })
            })
            .clone()
    }

    /// Shorthand for `self.property(key).put(value)`.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.property(key).put(value)
    }
}

pub(crate) fn compute(cell: &Cell, parent: &Weak<CellInner>, key: &str) -> Result<Value> {
    let Some(parent) = parent.upgrade().map(Cell::from_inner) else {
        unwatch(cell, key);
        return Ok(Value::Undefined);
    };
    match parent.resolve()? {
        Value::Object(object) => {
            watch(cell, &object, key);
            flatten(object.get(key))
        }
        Value::List(items) => {
            unwatch(cell, key);
            match key.parse::<usize>().ok().and_then(|index| items.get(index).cloned()) {
                Some(item) => flatten(item),
                None if key == "length" => Ok(Value::from(items.len())),
                None => Ok(Value::Undefined),
            }
        }
        _ => {
            unwatch(cell, key);
            Ok(Value::Undefined)
        }
    }
}

/// Write `value` into field `key` of the parent's value without notifying.
///
/// Objects are written in place. Lists are values, so writing an element
/// stores a new list in the parent. Returns the other cells bound to the
/// written field, whose watches were silenced.
pub(crate) fn store(cell: &Cell, parent: &Weak<CellInner>, key: &str, value: Value) -> Result<Vec<Cell>> {
    let parent = parent.upgrade().map(Cell::from_inner).unwrap_or_default();
    let silenced = match parent.resolve()? {
        Value::Object(object) => {
            let peers: Vec<Cell> = object
                .bound_cells(key)
                .into_iter()
                .filter(|peer| !peer.ptr_eq(cell))
                .collect();
            {
                let mut writers = peers.clone();
                writers.push(cell.clone());
                let _muted = Muted::new(writers);
                object.insert(key, value.clone());
            }
            watch(cell, &object, key);
            peers
        }
        Value::List(items) => {
            let items = with_element(items, key, value.clone())?;
            parent.store(Value::List(items))?
        }
        other => return Err(CellError::type_mismatch("object", other.type_name())),
    };
    cell.assign(value)?;
    Ok(silenced)
}

/// Other property cells reading the same field of the same object.
pub(crate) fn peers(cell: &Cell) -> Vec<Cell> {
    let Some(key) = cell.key() else {
        return Vec::new();
    };
    let object = match &cell.inner.state.borrow().watch {
        Some((object, _)) => object.clone(),
        None => return Vec::new(),
    };
    object
        .bound_cells(key)
        .into_iter()
        .filter(|peer| !peer.ptr_eq(cell))
        .collect()
}

/// `items` with element `key` replaced, or appended when `key` is the length.
fn with_element(mut items: Vec<Value>, key: &str, value: Value) -> Result<Vec<Value>> {
    let index = key
        .parse::<usize>()
        .map_err(|_| CellError::type_mismatch("object", "list"))?;
    match index.cmp(&items.len()) {
        std::cmp::Ordering::Less => items[index] = value,
        std::cmp::Ordering::Equal => items.push(value),
        std::cmp::Ordering::Greater => {
            return Err(CellError::IndexOutOfRange {
                index,
                len: items.len(),
            });
        }
    }
    Ok(items)
}

fn watch(cell: &Cell, object: &Object, key: &str) {
    let current = cell
        .inner
        .state
        .borrow()
        .watch
        .as_ref()
        .is_some_and(|(watched, _)| watched.ptr_eq(object));
    if current {
        return;
    }

    let owner = cell.downgrade();
    let on_change: Rc<dyn Fn()> = Rc::new(move || {
        let Some(inner) = owner.upgrade() else {
            return;
        };
        let cell = Cell::from_inner(inner);
        // An invalid cell has already notified its observers.
        if cell.inner.muted.get() || !cell.is_valid() {
            return;
        }
        tracing::trace!(cell = %cell.id(), "watched field changed");
        propagate::run(&cell, Reach::Field);
    });
    let watch = runtime::change_observer().watch(object, key, on_change);
    let previous = cell.inner.state.borrow_mut().watch.replace((object.clone(), watch));
    if let Some((old, _)) = previous {
        old.unbind_cell(key, cell);
    }
    object.bind_cell(key, cell);
}

fn unwatch(cell: &Cell, key: &str) {
    let previous = cell.inner.state.borrow_mut().watch.take();
    if let Some((old, _)) = previous {
        old.unbind_cell(key, cell);
    }
}

/// Silences the field watches of a write's own cells for the guard's
/// lifetime; the write's pass notifies them instead.
struct Muted {
    cells: Vec<Cell>,
}

impl Muted {
    fn new(cells: Vec<Cell>) -> Self {
        for cell in &cells {
            cell.inner.muted.set(true);
        }
        Self { cells }
    }
}

impl Drop for Muted {
    fn drop(&mut self) {
        for cell in &self.cells {
            cell.inner.muted.set(false);
        }
    }
}
