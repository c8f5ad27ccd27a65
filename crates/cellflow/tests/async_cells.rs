#![forbid(unsafe_code)]

//! Derivations over pending values.
//!
//! Validates that:
//! 1. Mapping an unsettled pending value yields a pending result that
//!    settles with the transformed value.
//! 2. Transforms over a pending value run once, however often the derived
//!    cell is read before it settles.
//! 3. Cells read by a deferred transform become dependencies of the derived
//!    cell, so later changes still reach its observers.
//! 4. Rejections flow through to every reader.

use std::cell::Cell as Counter;
use std::rc::Rc;

use cellflow::{Cell, CellError, Pending, Value};

fn pending_of(cell: &Cell) -> Pending {
    cell.get()
        .ok()
        .and_then(|value| value.as_pending().cloned())
        .unwrap_or_else(|| Pending::rejected(CellError::compute("not pending")))
}

#[test]
fn promise() {
    let (promise, resolve) = Pending::new();
    let variable = Cell::new(promise);
    let plus2 = variable.map(|value| value.as_f64().map(|n| n + 2.0));

    let finished = pending_of(&plus2);
    assert!(!finished.is_settled());
    resolve.resolve(4);
    assert_eq!(pollster::block_on(finished), Ok(6.into()));
}

#[test]
fn promise_composition() {
    let inner = Cell::new("a");
    let (promise, resolve) = Pending::new();
    let promise_var = Cell::new(promise);
    let outer_invoked = Rc::new(Counter::new(0));
    let inner_invoked = Rc::new(Counter::new(0));

    let composed = {
        let inner = inner.clone();
        let outer_invoked = Rc::clone(&outer_invoked);
        let inner_invoked = Rc::clone(&inner_invoked);
        promise_var.map(move |promise_value| {
            outer_invoked.set(outer_invoked.get() + 1);
            let inner_invoked = Rc::clone(&inner_invoked);
            inner.map(move |inner_value| {
                inner_invoked.set(inner_invoked.get() + 1);
                Value::List(vec![promise_value.clone(), inner_value])
            })
        })
    };

    let finished = pending_of(&composed);
    // Reading again before settling hands back the same pending result.
    assert!(finished.ptr_eq(&pending_of(&composed)));
    assert!(finished.result().is_none());

    resolve.resolve("promise");
    let result = pollster::block_on(finished);
    assert_eq!(outer_invoked.get(), 1, "outer map not invoked exactly once");
    assert_eq!(inner_invoked.get(), 1, "inner map not invoked exactly once");
    assert_eq!(result, Ok(Value::from_iter(["promise", "a"])));
}

#[test]
fn deferred_reads_become_dependencies() {
    let inner = Cell::new("a");
    let (promise, resolve) = Pending::new();
    let promise_var = Cell::new(promise);
    let composed = {
        let inner = inner.clone();
        promise_var.map(move |promise_value| {
            let inner_value = inner.get()?;
            cellflow::Result::Ok(Value::List(vec![promise_value, inner_value]))
        })
    };
    let notified = Rc::new(Counter::new(0));
    let hits = Rc::clone(&notified);
    composed.notifies(Rc::new(move || hits.set(hits.get() + 1)));

    let first = pending_of(&composed);
    resolve.resolve("p");
    assert_eq!(first.result(), Some(Ok(Value::from_iter(["p", "a"]))));
    assert!(composed.dependencies().iter().any(|dep| dep.ptr_eq(&inner)));

    inner.put("b").unwrap();
    assert_eq!(notified.get(), 1);

    // The source already settled, so the recompute finishes synchronously.
    let second = pending_of(&composed);
    assert!(second.is_settled());
    assert_eq!(second.result(), Some(Ok(Value::from_iter(["p", "b"]))));
}

#[test]
fn each_over_pending_list() {
    let (promise, resolve) = Pending::new();
    let items = Cell::new(promise);
    let doubled = items.each(|item| item.as_f64().map(|n| n * 2.0));
    let finished = pending_of(&doubled);

    resolve.resolve(Value::from_iter([1, 2, 3]));
    assert_eq!(
        pollster::block_on(finished),
        Ok(Value::from_iter([2, 4, 6]))
    );
}

#[test]
fn rejection_reaches_readers() {
    let (promise, resolve) = Pending::new();
    let source = Cell::new(promise);
    let mapped = source.map(|value| value);
    let finished = pending_of(&mapped);

    resolve.reject(CellError::rejected("backend offline"));
    assert_eq!(
        pollster::block_on(finished),
        Err(CellError::rejected("backend offline"))
    );
}

#[test]
fn replacing_the_pending_source_restarts() {
    let (first_promise, first_resolve) = Pending::new();
    let source = Cell::new(first_promise);
    let label = source.map(|value| value.as_str().map(str::to_uppercase));
    let stale = pending_of(&label);

    source.put(Pending::resolved("fresh")).unwrap();
    let fresh = pending_of(&label);
    assert_eq!(fresh.result(), Some(Ok("FRESH".into())));

    first_resolve.resolve("late");
    assert_eq!(stale.result(), Some(Ok("LATE".into())));
    assert_eq!(pending_of(&label).result(), Some(Ok("FRESH".into())));
}
