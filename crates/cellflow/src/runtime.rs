#![forbid(unsafe_code)]

//! Thread-local engine context.
//!
//! Every thread owns one cell graph context holding:
//!
//! - the stack of **recording frames**: each recompute pushes a frame, and
//!   every [`Cell::get`](crate::Cell::get) made while it is on top adds the
//!   read cell to it. The frame's contents become the recomputed cell's
//!   dependency set.
//! - the **recompute depth** counter, checked against
//!   [`GraphConfig::max_depth`](crate::GraphConfig::max_depth) when a limit
//!   is configured.
//! - the injected collaborators: the [`ChangeObserver`] used by property
//!   cells and the [`Validator`] used by validate cells.
//! - the [`GraphConfig`] in effect.
//!
//! Cells are `!Send`, so a graph never spans threads and no locking is
//! needed.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashSet;

use crate::cell::{Cell, CellId};
use crate::config::GraphConfig;
use crate::error::{CellError, Result};
use crate::observe::{ChangeObserver, FieldHooks};
use crate::schema::{TypeNameValidator, Validator};

struct Frame {
    reads: Vec<Cell>,
    seen: AHashSet<CellId>,
    ignore: bool,
}

impl Frame {
    fn new(ignore: bool) -> Self {
        Self {
            reads: Vec::new(),
            seen: AHashSet::new(),
            ignore,
        }
    }
}

struct Runtime {
    config: RefCell<GraphConfig>,
    frames: RefCell<Vec<Frame>>,
    depth: std::cell::Cell<usize>,
    next_id: std::cell::Cell<u64>,
    change_observer: RefCell<Rc<dyn ChangeObserver>>,
    validator: RefCell<Rc<dyn Validator>>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            config: RefCell::new(GraphConfig::default()),
            frames: RefCell::new(Vec::new()),
            depth: std::cell::Cell::new(0),
            next_id: std::cell::Cell::new(1),
            change_observer: RefCell::new(Rc::new(FieldHooks)),
            validator: RefCell::new(Rc::new(TypeNameValidator)),
        }
    }
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

// ─── Configuration & collaborators ───────────────────────────────────────────

/// Install `config` for the current thread.
pub fn configure(config: GraphConfig) {
    tracing::debug!(max_depth = ?config.max_depth, prime = config.prime_subscriptions, "graph configured");
    RUNTIME.with(|rt| *rt.config.borrow_mut() = config);
}

/// The configuration in effect on the current thread.
#[must_use]
pub fn config() -> GraphConfig {
    RUNTIME.with(|rt| rt.config.borrow().clone())
}

/// Replace the field-change observer. Returns the previous one.
///
/// Property cells pick up the new observer the next time they recompute.
pub fn set_change_observer(observer: Rc<dyn ChangeObserver>) -> Rc<dyn ChangeObserver> {
    RUNTIME.with(|rt| std::mem::replace(&mut *rt.change_observer.borrow_mut(), observer))
}

pub(crate) fn change_observer() -> Rc<dyn ChangeObserver> {
    RUNTIME.with(|rt| Rc::clone(&rt.change_observer.borrow()))
}

/// Replace the validation predicate used by validate cells. Returns the
/// previous one.
pub fn set_validator(validator: Rc<dyn Validator>) -> Rc<dyn Validator> {
    RUNTIME.with(|rt| std::mem::replace(&mut *rt.validator.borrow_mut(), validator))
}

pub(crate) fn validator() -> Rc<dyn Validator> {
    RUNTIME.with(|rt| Rc::clone(&rt.validator.borrow()))
}

pub(crate) fn next_cell_id() -> CellId {
    RUNTIME.with(|rt| {
        let id = rt.next_id.get();
        rt.next_id.set(id + 1);
        CellId(id)
    })
}

// ─── Recording frames ────────────────────────────────────────────────────────

/// Pops its frame when dropped, so a panicking transform cannot leave a
/// stale frame on the stack.
struct FrameGuard {
    active: bool,
}

impl FrameGuard {
    fn push(ignore: bool) -> Self {
        RUNTIME.with(|rt| rt.frames.borrow_mut().push(Frame::new(ignore)));
        Self { active: true }
    }

    fn finish(mut self) -> Vec<Cell> {
        self.active = false;
        RUNTIME
            .with(|rt| rt.frames.borrow_mut().pop())
            .map(|frame| frame.reads)
            .unwrap_or_default()
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.active {
            RUNTIME.with(|rt| {
                rt.frames.borrow_mut().pop();
            });
        }
    }
}

/// Run `f` in a fresh recording frame and return the cells it read, in
/// first-read order.
pub(crate) fn tracked<R>(f: impl FnOnce() -> R) -> (R, Vec<Cell>) {
    let guard = FrameGuard::push(false);
    let out = f();
    (out, guard.finish())
}

/// Run `f` without recording any of its reads as dependencies of the
/// computation currently running.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let guard = FrameGuard::push(true);
    let out = f();
    drop(guard.finish());
    out
}

/// Whether a computation is currently recording reads.
#[must_use]
pub fn is_tracking() -> bool {
    RUNTIME.with(|rt| rt.frames.borrow().last().is_some_and(|frame| !frame.ignore))
}

pub(crate) fn record_read(cell: &Cell) {
    RUNTIME.with(|rt| {
        let mut frames = rt.frames.borrow_mut();
        if let Some(frame) = frames.last_mut()
            && !frame.ignore
            && frame.seen.insert(cell.id())
        {
            frame.reads.push(cell.clone());
        }
    });
}

// ─── Depth guard ─────────────────────────────────────────────────────────────

pub(crate) struct DepthGuard;

impl Drop for DepthGuard {
    fn drop(&mut self) {
        RUNTIME.with(|rt| rt.depth.set(rt.depth.get().saturating_sub(1)));
    }
}

/// Enter one level of recompute nesting.
pub(crate) fn enter_compute(cell: CellId) -> Result<DepthGuard> {
    RUNTIME.with(|rt| {
        let limit = rt.config.borrow().max_depth;
        let depth = rt.depth.get();
        if let Some(limit) = limit
            && depth >= limit
        {
            tracing::debug!(%cell, limit, "recompute depth exceeded");
            return Err(CellError::DepthExceeded { limit });
        }
        rt.depth.set(depth + 1);
        Ok(DepthGuard)
    })
}

/// Current recompute nesting depth.
#[must_use]
pub fn depth() -> usize {
    RUNTIME.with(|rt| rt.depth.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracked_collects_reads_once_in_order() {
        let a = Cell::new(1);
        let b = Cell::new(2);
        let ((), reads) = tracked(|| {
            let _ = b.get();
            let _ = a.get();
            let _ = b.get();
        });
        let ids: Vec<CellId> = reads.iter().map(Cell::id).collect();
        assert_eq!(ids, vec![b.id(), a.id()]);
    }

    #[test]
    fn untracked_reads_are_invisible() {
        let a = Cell::new(1);
        let ((), reads) = tracked(|| {
            untracked(|| {
                assert!(!is_tracking());
                let _ = a.get();
            });
        });
        assert!(reads.is_empty());
    }

    #[test]
    fn nested_frames_are_independent() {
        let a = Cell::new(1);
        let b = Cell::new(2);
        let (inner, outer) = tracked(|| {
            let _ = a.get();
            let ((), inner) = tracked(|| {
                let _ = b.get();
            });
            inner
        });
        assert_eq!(inner.len(), 1);
        assert!(inner[0].ptr_eq(&b));
        assert_eq!(outer.len(), 1);
        assert!(outer[0].ptr_eq(&a));
    }

    #[test]
    fn frame_popped_after_panic() {
        let result = std::panic::catch_unwind(|| {
            tracked(|| -> u8 { panic!("transform exploded") });
        });
        assert!(result.is_err());
        assert!(!is_tracking());
    }

    #[test]
    fn depth_guard_limits_nesting() {
        configure(GraphConfig::new().with_max_depth(2));
        let first = enter_compute(CellId(1)).unwrap();
        let second = enter_compute(CellId(2)).unwrap();
        assert_eq!(depth(), 2);
        assert_eq!(
            enter_compute(CellId(3)).err(),
            Some(CellError::DepthExceeded { limit: 2 })
        );
        drop(second);
        drop(first);
        assert_eq!(depth(), 0);
        configure(GraphConfig::default());
    }

    #[test]
    fn default_config_places_no_limit() {
        configure(GraphConfig::default());
        let guards: Vec<DepthGuard> = (0..1_000).map(|id| enter_compute(CellId(id)).unwrap()).collect();
        assert_eq!(depth(), 1_000);
        drop(guards);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn collaborators_can_be_swapped() {
        let previous = set_validator(Rc::new(
            |_: &crate::Value, _: &crate::Value| -> Result<Vec<crate::Violation>> { Ok(Vec::new()) },
        ));
        let restored = set_validator(previous);
        drop(restored);

        let previous = set_change_observer(Rc::new(FieldHooks));
        drop(set_change_observer(previous));
    }
}
