#![forbid(unsafe_code)]

//! The cell container.
//!
//! A [`Cell`] holds a [`Value`], a validity flag, an observer set and the
//! dependency set recorded by its last recompute. Source cells change only
//! through [`put`](Cell::put); derived cells (map, each, apply, caching,
//! property, validate) treat their value as a cache.
//!
//! # Design
//!
//! `Cell` is a cheap handle over `Rc<CellInner>`; clones share state.
//! Dependencies are held strongly (a derived cell keeps its sources alive)
//! and the reverse edges, `dependents`, weakly, so dropping a derived cell
//! detaches it from the graph. Dead reverse edges are pruned lazily.
//!
//! Property cells are the exception: the parent owns the property cells it
//! created, and each one refers back to its parent weakly. A property cell
//! outlives the handle that created it, so observers registered on
//! `root.property("a")` keep firing while `root` is alive.
//!
//! # Invariants
//!
//! 1. `get()` on a valid cell returns the cached value without running user
//!    code.
//! 2. A recompute replaces the dependency set wholesale with the cells read
//!    during that recompute.
//! 3. A cell marked stale while it was recomputing stays invalid after the
//!    recompute finishes.
//! 4. A cell never depends on itself.
//!
//! # Failure Modes
//!
//! - **Self-read during recompute**: the read fails with
//!   [`CellError::Cycle`]; the cell stays invalid.
//! - **Transform error**: the cell stays invalid, the error reaches the
//!   reader, and the reads made before the failure become the dependency set
//!   so a later fix to a source notifies observers.

use std::cell::{OnceCell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::derive;
use crate::error::{CellError, Result};
use crate::object::Object;
use crate::observe::Watch;
use crate::propagate::{self, Reach};
use crate::runtime;
use crate::value::Value;

/// Unique identifier of a cell within its thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub(crate) u64);

impl CellId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receives invalidation notifications from cells it is registered on.
pub trait Observer {
    fn invalidate(&self);
}

impl<F: Fn()> Observer for F {
    fn invalidate(&self) {
        self();
    }
}

pub(crate) type Transform = Rc<dyn Fn(Value) -> Result<Value>>;
pub(crate) type Getter = Rc<dyn Fn() -> Result<Value>>;
pub(crate) type Setter = Rc<dyn Fn(Value) -> Result<()>>;

/// How a cell produces its value.
pub(crate) enum Kind {
    Source,
    Map { source: Cell, transform: Transform },
    Each { source: Cell, transform: Transform },
    Apply { function: Cell, args: Vec<Cell> },
    Caching { getter: Getter, setter: Setter },
    Property { parent: Weak<CellInner>, key: String },
    Validate { target: Weak<CellInner> },
}

impl Kind {
    fn name(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Map { .. } => "map",
            Self::Each { .. } => "each",
            Self::Apply { .. } => "apply",
            Self::Caching { .. } => "caching",
            Self::Property { .. } => "property",
            Self::Validate { .. } => "validate",
        }
    }
}

pub(crate) struct State {
    /// Cached (or assigned) value.
    pub(crate) value: Value,
    /// What `put` stored into a source cell; may be a cell to flatten.
    pub(crate) assigned: Value,
    pub(crate) valid: bool,
    pub(crate) computing: bool,
    /// Bumped whenever the cell is marked stale.
    pub(crate) epoch: u64,
    pub(crate) dependencies: Vec<Cell>,
    /// Field watch held by property cells: the watched object and its guard.
    pub(crate) watch: Option<(Object, Watch)>,
}

pub(crate) struct CellInner {
    pub(crate) id: CellId,
    pub(crate) kind: Kind,
    pub(crate) state: RefCell<State>,
    observers: RefCell<Vec<Rc<dyn Observer>>>,
    dependents: RefCell<Vec<Weak<CellInner>>>,
    /// Property cells created by this cell, by key.
    pub(crate) children: RefCell<BTreeMap<String, Cell>>,
    /// Suppresses this cell's own field watch while it writes its field.
    pub(crate) muted: std::cell::Cell<bool>,
    pub(crate) schema: OnceCell<Cell>,
    pub(crate) validator: RefCell<Weak<CellInner>>,
}

/// A reactive value container.
///
/// Cloning a `Cell` creates a new handle to the **same** cell.
#[derive(Clone)]
pub struct Cell {
    pub(crate) inner: Rc<CellInner>,
}

impl Default for Cell {
    fn default() -> Self {
        Self::new(Value::Undefined)
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Cell");
        out.field("id", &self.inner.id)
            .field("kind", &self.inner.kind.name());
        // Skip state while a recompute holds it.
        if let Ok(state) = self.inner.state.try_borrow() {
            out.field("valid", &state.valid);
            if state.valid {
                out.field("value", &state.value);
            }
        }
        out.finish()
    }
}

impl Observer for Cell {
    fn invalidate(&self) {
        Cell::invalidate(self);
    }
}

impl Cell {
    /// A source cell holding `value`.
    ///
    /// A `Value::Cell` is stored lazily: this cell depends on it and reads
    /// flatten it.
    pub fn new(value: impl Into<Value>) -> Self {
        let cell = Self::with_kind(Kind::Source);
        cell.assign_source(value.into());
        cell
    }

    pub(crate) fn with_kind(kind: Kind) -> Self {
        let id = runtime::next_cell_id();
        Self {
            inner: Rc::new(CellInner {
                id,
                kind,
                state: RefCell::new(State {
                    value: Value::Undefined,
                    assigned: Value::Undefined,
                    valid: false,
                    computing: false,
                    epoch: 0,
                    dependencies: Vec::new(),
                    watch: None,
                }),
                observers: RefCell::new(Vec::new()),
                dependents: RefCell::new(Vec::new()),
                children: RefCell::new(BTreeMap::new()),
                muted: std::cell::Cell::new(false),
                schema: OnceCell::new(),
                validator: RefCell::new(Weak::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<CellInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<CellInner> {
        Rc::downgrade(&self.inner)
    }

    #[must_use]
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Whether both handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether a read would return the cache without recomputing.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.state.borrow().valid
    }

    /// Cells read by the last recompute.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Cell> {
        self.inner.state.borrow().dependencies.clone()
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    /// Number of live cells whose last recompute read this one.
    #[must_use]
    pub fn dependent_count(&self) -> usize {
        self.dependents().len()
    }

    // ─── Reading ─────────────────────────────────────────────────────────────

    /// Current value, recomputing first if the cell is invalid.
    ///
    /// When called inside another cell's computation the read is recorded as
    /// a dependency of that computation.
    pub fn get(&self) -> Result<Value> {
        runtime::record_read(self);
        self.resolve()
    }

    /// Like [`get`](Self::get) but never recorded as a dependency.
    pub(crate) fn resolve(&self) -> Result<Value> {
        {
            let state = self.inner.state.borrow();
            if state.computing {
                tracing::debug!(cell = %self.id(), "self-read during recompute");
                return Err(CellError::Cycle { cell: self.id() });
            }
            if state.valid {
                return Ok(state.value.clone());
            }
        }
        self.recompute()
    }

    fn recompute(&self) -> Result<Value> {
        let _depth = runtime::enter_compute(self.id())?;
        let epoch = {
            let mut state = self.inner.state.borrow_mut();
            state.computing = true;
            state.epoch
        };
        let computing = ComputingGuard { cell: self };
        let (result, reads) = runtime::tracked(|| derive::compute(self));
        drop(computing);

        let dependency_count = reads.len();
        self.rewire(reads);
        {
            let mut state = self.inner.state.borrow_mut();
            match &result {
                Ok(value) => {
                    state.value = value.clone();
                    state.valid = state.epoch == epoch;
                }
                Err(_) => state.valid = false,
            }
        }
        tracing::trace!(
            cell = %self.id(),
            kind = self.inner.kind.name(),
            dependencies = dependency_count,
            ok = result.is_ok(),
            "recomputed"
        );
        if let Err(err) = &result
            && err.is_structural()
        {
            tracing::debug!(cell = %self.id(), error = %err, "recompute aborted");
        }
        result
    }

    // ─── Writing ─────────────────────────────────────────────────────────────

    /// Assign a new value and notify.
    ///
    /// - applicative cells hand the value to their function's inverse;
    /// - property cells write the field on the parent's object;
    /// - caching cells pass the value to their setter first;
    /// - every other cell takes the value directly and is marked valid.
    ///
    /// Observers of this cell and of everything depending on it are notified
    /// before `put` returns.
    pub fn put(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if let Kind::Apply { function, args } = &self.inner.kind {
            return derive::put_through_inverse(self, function, args, value);
        }
        let silenced = self.store(value)?;
        propagate::run_with(self, Reach::Assigned, silenced);
        Ok(())
    }

    /// The storing half of [`put`](Self::put): no pass is run, except by
    /// an inverse function writing its arguments.
    ///
    /// Returns the cells whose field watches were silenced while storing;
    /// the caller's pass must mark them stale.
    pub(crate) fn store(&self, value: Value) -> Result<Vec<Cell>> {
        match &self.inner.kind {
            Kind::Apply { function, args } => {
                derive::put_through_inverse(self, function, args, value)?;
                Ok(Vec::new())
            }
            Kind::Property { parent, key } => crate::property::store(self, parent, key, value),
            Kind::Caching { setter, .. } => {
                setter(value.clone())?;
                self.assign(value)?;
                Ok(Vec::new())
            }
            _ => {
                self.assign(value)?;
                Ok(Vec::new())
            }
        }
    }

    /// Mark the cell stale and notify, without computing anything.
    pub fn invalidate(&self) {
        propagate::run(self, Reach::Stale);
    }

    /// Store `value` as the cell's current value without notifying.
    pub(crate) fn assign(&self, value: Value) -> Result<()> {
        if matches!(self.inner.kind, Kind::Source) {
            self.assign_source(value);
            return Ok(());
        }
        if let Value::Cell(_) = value {
            let (resolved, reads) = runtime::tracked(|| derive::flatten(value));
            self.attach(reads);
            let resolved = resolved?;
            let mut state = self.inner.state.borrow_mut();
            state.value = resolved;
            state.valid = true;
            return Ok(());
        }
        let mut state = self.inner.state.borrow_mut();
        state.value = value;
        state.valid = true;
        Ok(())
    }

    fn assign_source(&self, value: Value) {
        let dependencies = match &value {
            Value::Cell(inner) => vec![inner.clone()],
            _ => Vec::new(),
        };
        {
            let mut state = self.inner.state.borrow_mut();
            state.assigned = value.clone();
            if dependencies.is_empty() {
                state.value = value;
                state.valid = true;
            } else {
                state.valid = false;
            }
        }
        self.rewire(dependencies);
    }

    pub(crate) fn mark_stale(&self) {
        let mut state = self.inner.state.borrow_mut();
        state.valid = false;
        state.epoch = state.epoch.wrapping_add(1);
    }

    // ─── Observers ───────────────────────────────────────────────────────────

    /// Register `target` for invalidation notifications. Registering the same
    /// target again has no effect.
    pub fn notifies(&self, target: Rc<dyn Observer>) {
        let mut observers = self.inner.observers.borrow_mut();
        if !observers.iter().any(|existing| same_observer(existing, &target)) {
            observers.push(target);
        }
    }

    /// Remove `target` from the observer set.
    pub fn stop_notifies(&self, target: &Rc<dyn Observer>) {
        self.inner
            .observers
            .borrow_mut()
            .retain(|existing| !same_observer(existing, target));
    }

    pub(crate) fn observers(&self) -> Vec<Rc<dyn Observer>> {
        self.inner.observers.borrow().clone()
    }

    /// Call `callback` on every invalidation of this cell.
    ///
    /// The callback receives an [`Event`] whose [`value`](Event::value)
    /// reads the cell, so it decides itself whether to force a recompute.
    /// Unless disabled in [`GraphConfig`](crate::GraphConfig), the cell is
    /// read once now so its dependencies are wired before the first change.
    /// The returned handle can be passed to [`stop_notifies`](Self::stop_notifies).
    pub fn subscribe(&self, callback: impl Fn(&Event) + 'static) -> Rc<dyn Observer> {
        let subscriber: Rc<dyn Observer> = Rc::new(Subscriber {
            cell: self.downgrade(),
            callback: Box::new(callback),
        });
        self.notifies(Rc::clone(&subscriber));
        if runtime::config().prime_subscriptions
            && let Err(err) = runtime::untracked(|| self.get())
        {
            tracing::debug!(cell = %self.id(), error = %err, "subscription priming failed");
        }
        subscriber
    }

    // ─── Graph edges ─────────────────────────────────────────────────────────

    /// Replace the dependency set and update reverse edges.
    pub(crate) fn rewire(&self, mut dependencies: Vec<Cell>) {
        dependencies.retain(|dependency| !dependency.ptr_eq(self));
        let previous = std::mem::replace(
            &mut self.inner.state.borrow_mut().dependencies,
            dependencies.clone(),
        );
        for old in &previous {
            if !dependencies.iter().any(|dependency| dependency.ptr_eq(old)) {
                old.remove_dependent(self);
            }
        }
        for dependency in &dependencies {
            dependency.add_dependent(self);
        }
    }

    /// Add dependencies discovered after the recompute finished.
    pub(crate) fn attach(&self, discovered: Vec<Cell>) {
        for dependency in discovered {
            if dependency.ptr_eq(self) {
                continue;
            }
            {
                let mut state = self.inner.state.borrow_mut();
                if state.dependencies.iter().any(|existing| existing.ptr_eq(&dependency)) {
                    continue;
                }
                state.dependencies.push(dependency.clone());
            }
            dependency.add_dependent(self);
        }
    }

    fn add_dependent(&self, dependent: &Cell) {
        let target = dependent.downgrade();
        let mut dependents = self.inner.dependents.borrow_mut();
        dependents.retain(|weak| weak.strong_count() > 0);
        if !dependents.iter().any(|weak| Weak::ptr_eq(weak, &target)) {
            dependents.push(target);
        }
    }

    fn remove_dependent(&self, dependent: &Cell) {
        let target = dependent.downgrade();
        self.inner
            .dependents
            .borrow_mut()
            .retain(|weak| weak.strong_count() > 0 && !Weak::ptr_eq(weak, &target));
    }

    pub(crate) fn dependents(&self) -> Vec<Cell> {
        let mut dependents = self.inner.dependents.borrow_mut();
        dependents.retain(|weak| weak.strong_count() > 0);
        dependents
            .iter()
            .filter_map(Weak::upgrade)
            .map(Cell::from_inner)
            .collect()
    }

    pub(crate) fn children(&self) -> Vec<Cell> {
        self.inner.children.borrow().values().cloned().collect()
    }

    /// The cell this property cell was created from, while it is alive.
    #[must_use]
    pub fn parent(&self) -> Option<Cell> {
        match &self.inner.kind {
            Kind::Property { parent, .. } => parent.upgrade().map(Cell::from_inner),
            _ => None,
        }
    }

    /// The field name of a property cell.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match &self.inner.kind {
            Kind::Property { key, .. } => Some(key),
            _ => None,
        }
    }
}

fn same_observer(a: &Rc<dyn Observer>, b: &Rc<dyn Observer>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

/// Clears the computing flag even if the computation panics.
struct ComputingGuard<'a> {
    cell: &'a Cell,
}

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        self.cell.inner.state.borrow_mut().computing = false;
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Handed to [`Cell::subscribe`] callbacks.
pub struct Event {
    cell: Weak<CellInner>,
}

impl Event {
    /// Read the notifying cell. A dropped cell reads as `Undefined`.
    pub fn value(&self) -> Result<Value> {
        match self.cell() {
            Some(cell) => cell.get(),
            None => Ok(Value::Undefined),
        }
    }

    #[must_use]
    pub fn cell(&self) -> Option<Cell> {
        self.cell.upgrade().map(Cell::from_inner)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("cell", &self.cell.upgrade().map(|inner| inner.id))
            .finish()
    }
}

struct Subscriber {
    cell: Weak<CellInner>,
    callback: Box<dyn Fn(&Event)>,
}

impl Observer for Subscriber {
    fn invalidate(&self) {
        let event = Event {
            cell: self.cell.clone(),
        };
        (self.callback)(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as Counter;

    fn counting_observer() -> (Rc<Counter<u32>>, Rc<dyn Observer>) {
        let count = Rc::new(Counter::new(0));
        let hits = Rc::clone(&count);
        (count, Rc::new(move || hits.set(hits.get() + 1)))
    }

    #[test]
    fn source_put_then_get() {
        let cell = Cell::new(1);
        assert_eq!(cell.get(), Ok(Value::from(1)));
        cell.put(2).unwrap();
        assert_eq!(cell.get(), Ok(Value::from(2)));
        assert!(cell.is_valid());
    }

    #[test]
    fn default_is_undefined() {
        assert_eq!(Cell::default().get(), Ok(Value::Undefined));
    }

    #[test]
    fn put_notifies_once() {
        let cell = Cell::new(1);
        let (count, observer) = counting_observer();
        cell.notifies(Rc::clone(&observer));
        assert_eq!(count.get(), 0);

        cell.put(2).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn duplicate_registration_is_coalesced() {
        let cell = Cell::new(1);
        let (count, observer) = counting_observer();
        cell.notifies(Rc::clone(&observer));
        cell.notifies(Rc::clone(&observer));
        assert_eq!(cell.observer_count(), 1);

        cell.put(2).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn stop_notifies_removes_target() {
        let cell = Cell::new(1);
        let (count, observer) = counting_observer();
        cell.notifies(Rc::clone(&observer));
        cell.put(2).unwrap();
        cell.stop_notifies(&observer);
        cell.put(3).unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(cell.observer_count(), 0);
    }

    #[test]
    fn invalidate_keeps_value_and_notifies() {
        let cell = Cell::new(5);
        let (count, observer) = counting_observer();
        cell.notifies(observer);
        cell.invalidate();
        assert!(!cell.is_valid());
        assert_eq!(count.get(), 1);
        assert_eq!(cell.get(), Ok(Value::from(5)));
        assert!(cell.is_valid());
    }

    #[test]
    fn cell_as_observer_invalidates_it() {
        let source = Cell::new(1);
        let follower = Cell::new(10);
        source.notifies(Rc::new(follower.clone()));
        source.put(2).unwrap();
        assert!(!follower.is_valid());
        assert_eq!(follower.get(), Ok(Value::from(10)));
    }

    #[test]
    fn source_holding_cell_flattens_lazily() {
        let inner = Cell::new(8);
        let outer = Cell::new(inner.clone());
        assert!(!outer.is_valid());
        assert_eq!(outer.get(), Ok(Value::from(8)));

        let (count, observer) = counting_observer();
        outer.notifies(observer);
        inner.put(9).unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(outer.get(), Ok(Value::from(9)));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let cell = Cell::default();
        cell.put(cell.clone()).unwrap();
        assert_eq!(cell.get(), Err(CellError::Cycle { cell: cell.id() }));
        assert!(!cell.is_valid());
        assert!(cell.dependencies().is_empty());
    }

    #[test]
    fn subscribe_event_reads_value() {
        let cell = Cell::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handle = cell.subscribe(move |event| {
            sink.borrow_mut().push(event.value().unwrap());
        });
        cell.put(2).unwrap();
        cell.put(3).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::from(2), Value::from(3)]);

        cell.stop_notifies(&handle);
        cell.put(4).unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn debug_shows_kind_and_value() {
        let cell = Cell::new(42);
        let dbg = format!("{cell:?}");
        assert!(dbg.contains("source"));
        assert!(dbg.contains("42"));
    }

    #[test]
    fn ids_are_unique() {
        let a = Cell::default();
        let b = Cell::default();
        assert_ne!(a.id(), b.id());
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
    }
}
