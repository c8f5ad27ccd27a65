#![forbid(unsafe_code)]

//! Derived cells: map, each, apply and caching.
//!
//! Every derived cell recomputes lazily through [`compute`], which runs
//! inside the cell's recording frame. Two rules apply to every result:
//!
//! - **Flattening**: a result that is itself a cell is replaced by that
//!   cell's current value, and the inner cell becomes a dependency, so a
//!   change inside it reaches the outer cell's observers.
//! - **Pending inputs**: map and each over an unsettled [`Pending`] return a
//!   chained `Pending` instead of calling the transform. The chained handle
//!   is the cached value, so the transform runs once when the input settles,
//!   however many times the cell is read meanwhile. Cells read by the
//!   transform at that point are added to the cell's dependencies.

use std::rc::Rc;

use crate::cell::{Cell, Kind, Transform};
use crate::error::{CellError, Result};
use crate::pending::Pending;
use crate::property;
use crate::runtime;
use crate::schema;
use crate::value::{IntoComputed, Value};

impl Cell {
    /// A cell holding `transform` of this cell's value.
    ///
    /// The transform runs lazily on the first read after this cell changes.
    /// Returning a cell flattens it; an unsettled pending input defers the
    /// transform until it settles.
    pub fn map<F, R>(&self, transform: F) -> Cell
    where
        F: Fn(Value) -> R + 'static,
        R: IntoComputed,
    {
        Cell::with_kind(Kind::Map {
            source: self.clone(),
            transform: Rc::new(move |value: Value| transform(value).into_computed()),
        })
    }

    /// A cell holding this cell's list with `transform` applied to every
    /// element. An undefined source maps to undefined.
    pub fn each<F, R>(&self, transform: F) -> Cell
    where
        F: Fn(Value) -> R + 'static,
        R: IntoComputed,
    {
        Cell::with_kind(Kind::Each {
            source: self.clone(),
            transform: Rc::new(move |value: Value| transform(value).into_computed()),
        })
    }

    /// Call `f` with every element of this cell's list.
    pub fn for_each(&self, mut f: impl FnMut(Value)) -> Result<()> {
        match self.get()? {
            Value::List(items) => {
                items.into_iter().for_each(&mut f);
                Ok(())
            }
            Value::Undefined => Ok(()),
            other => Err(CellError::type_mismatch("list", other.type_name())),
        }
    }

    /// A cell holding the result of calling this cell's [`Function`] with the
    /// values of `args`.
    ///
    /// Writing to the result runs the function's inverse.
    ///
    /// [`Function`]: crate::Function
    #[must_use]
    pub fn apply(&self, args: &[Cell]) -> Cell {
        Cell::with_kind(Kind::Apply {
            function: self.clone(),
            args: args.to_vec(),
        })
    }

    /// A cell backed by user code: `getter` produces the value (its reads
    /// are tracked like a map transform) and `setter` receives every `put`
    /// before the cell stores it.
    pub fn caching<G, R, S>(getter: G, setter: S) -> Cell
    where
        G: Fn() -> R + 'static,
        R: IntoComputed,
        S: Fn(Value) -> Result<()> + 'static,
    {
        Cell::with_kind(Kind::Caching {
            getter: Rc::new(move || getter().into_computed()),
            setter: Rc::new(setter),
        })
    }
}

/// Produce a fresh value for `cell`. Runs inside its recording frame.
pub(crate) fn compute(cell: &Cell) -> Result<Value> {
    match &cell.inner.kind {
        Kind::Source => {
            let assigned = cell.inner.state.borrow().assigned.clone();
            flatten(assigned)
        }
        Kind::Map { source, transform } => match source.get()? {
            Value::Pending(input) => Ok(Value::Pending(chain(cell, &input, {
                let transform = Rc::clone(transform);
                move |value| flatten(transform(value)?)
            }))),
            input => flatten(transform(input)?),
        },
        Kind::Each { source, transform } => match source.get()? {
            Value::Pending(input) => Ok(Value::Pending(chain(cell, &input, {
                let transform = Rc::clone(transform);
                move |value| each_items(value, &transform)
            }))),
            input => each_items(input, transform),
        },
        Kind::Apply { function, args } => apply_function(function, args),
        Kind::Caching { getter, .. } => flatten(getter()?),
        Kind::Property { parent, key } => property::compute(cell, parent, key),
        Kind::Validate { target } => schema::compute(target),
    }
}

/// Replace a cell value by the value it holds, recording the read.
pub(crate) fn flatten(mut value: Value) -> Result<Value> {
    while let Value::Cell(inner) = value {
        tracing::trace!(inner = %inner.id(), "flatten");
        value = inner.get()?;
    }
    Ok(value)
}

fn each_items(value: Value, transform: &Transform) -> Result<Value> {
    match value {
        Value::Undefined => Ok(Value::Undefined),
        Value::List(items) => items
            .into_iter()
            .map(|item| flatten(transform(item)?))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        other => Err(CellError::type_mismatch("list", other.type_name())),
    }
}

/// Continue `input` with `step`, crediting the step's reads to `cell`.
fn chain(cell: &Cell, input: &Pending, step: impl Fn(Value) -> Result<Value> + 'static) -> Pending {
    if let Some(result) = input.result() {
        // Already settled: the step's reads land in the current frame.
        return match result.and_then(step) {
            Ok(Value::Pending(next)) => next,
            other => Pending::settled(other),
        };
    }
    let owner = cell.downgrade();
    input.then(move |value| {
        let (result, reads) = runtime::tracked(|| step(value));
        match owner.upgrade() {
            Some(inner) => Cell::from_inner(inner).attach(reads),
            None => tracing::trace!("pending settled after its cell was dropped"),
        }
        result
    })
}

fn apply_function(function: &Cell, args: &[Cell]) -> Result<Value> {
    let function = match function.get()? {
        Value::Function(function) => function,
        Value::Undefined => return Ok(Value::Undefined),
        other => return Err(CellError::type_mismatch("function", other.type_name())),
    };
    let values = args.iter().map(Cell::get).collect::<Result<Vec<_>>>()?;
    flatten(function.call(&values)?)
}

/// Write `value` through the inverse of `cell`'s function.
pub(crate) fn put_through_inverse(cell: &Cell, function: &Cell, args: &[Cell], value: Value) -> Result<()> {
    let function = match runtime::untracked(|| function.get())? {
        Value::Function(function) => function,
        other => return Err(CellError::type_mismatch("function", other.type_name())),
    };
    function
        .invert(value, args)
        .unwrap_or_else(|| Err(CellError::NoInverse { cell: cell.id() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Function;
    use std::cell::Cell as Counter;

    fn number(cell: &Cell) -> f64 {
        cell.get().ok().and_then(|value| value.as_f64()).unwrap_or(f64::NAN)
    }

    #[test]
    fn map_is_lazy_and_memoized() {
        let runs = Rc::new(Counter::new(0));
        let seen = Rc::clone(&runs);
        let source = Cell::new(2);
        let doubled = source.map(move |value| {
            seen.set(seen.get() + 1);
            value.as_f64().map(|n| n * 2.0)
        });
        assert_eq!(runs.get(), 0);
        assert_eq!(number(&doubled), 4.0);
        assert_eq!(number(&doubled), 4.0);
        assert_eq!(runs.get(), 1);

        source.put(5).unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(number(&doubled), 10.0);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn map_flattens_returned_cell() {
        let inner = Cell::new(3);
        let selector = Cell::new(true);
        let chosen = {
            let inner = inner.clone();
            selector.map(move |flag| {
                if flag.as_bool().unwrap_or(false) {
                    Value::from(&inner)
                } else {
                    Value::from(0)
                }
            })
        };
        assert_eq!(number(&chosen), 3.0);
        assert!(chosen.dependencies().iter().any(|dep| dep.ptr_eq(&inner)));

        inner.put(4).unwrap();
        assert!(!chosen.is_valid());
        assert_eq!(number(&chosen), 4.0);
    }

    #[test]
    fn dependencies_follow_last_recompute() {
        let flag = Cell::new(true);
        let a = Cell::new("a");
        let b = Cell::new("b");
        let pick = {
            let (flag, a, b) = (flag.clone(), a.clone(), b.clone());
            Cell::caching(
                move || {
                    if flag.get()?.as_bool().unwrap_or(false) {
                        a.get()
                    } else {
                        b.get()
                    }
                },
                |_| Ok(()),
            )
        };
        assert_eq!(pick.get(), Ok("a".into()));
        assert_eq!(pick.dependencies().len(), 2);

        flag.put(false).unwrap();
        assert_eq!(pick.get(), Ok("b".into()));
        a.put("z").unwrap();
        assert!(pick.is_valid());
        assert_eq!(a.dependent_count(), 0);
    }

    #[test]
    fn each_maps_elements() {
        let list = Cell::new(Value::from_iter([1, 2, 3]));
        let squared = list.each(|value| value.as_f64().map(|n| n * n));
        assert_eq!(squared.get(), Ok(Value::from_iter([1, 4, 9])));

        let mut seen = Vec::new();
        squared.for_each(|value| seen.push(value)).unwrap();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn each_over_undefined_and_scalar() {
        let empty = Cell::default().each(|value| value);
        assert_eq!(empty.get(), Ok(Value::Undefined));

        let scalar = Cell::new(1).each(|value| value);
        assert_eq!(
            scalar.get(),
            Err(CellError::type_mismatch("list", "number"))
        );
    }

    #[test]
    fn apply_calls_function_with_argument_values() {
        let add = Cell::new(Function::new(|args: &[Value]| {
            args.iter().filter_map(Value::as_f64).sum::<f64>()
        }));
        let a = Cell::new(1);
        let b = Cell::new(2);
        let sum = add.apply(&[a.clone(), b.clone()]);
        assert_eq!(number(&sum), 3.0);
        b.put(10).unwrap();
        assert_eq!(number(&sum), 11.0);
    }

    #[test]
    fn apply_without_inverse_rejects_put() {
        let identity = Cell::new(Function::new(|args: &[Value]| args.first().cloned()));
        let a = Cell::new(1);
        let result = identity.apply(&[a.clone()]);
        assert_eq!(result.put(5), Err(CellError::NoInverse { cell: result.id() }));
        assert_eq!(a.get(), Ok(1.into()));
    }

    #[test]
    fn apply_over_non_function() {
        let not_a_function = Cell::new(3);
        let result = not_a_function.apply(&[]);
        assert_eq!(
            result.get(),
            Err(CellError::type_mismatch("function", "number"))
        );
        assert_eq!(Cell::default().apply(&[]).get(), Ok(Value::Undefined));
    }

    #[test]
    fn map_over_unsettled_pending_runs_once() {
        let runs = Rc::new(Counter::new(0));
        let seen = Rc::clone(&runs);
        let (pending, resolver) = Pending::new();
        let source = Cell::new(pending);
        let mapped = source.map(move |value| {
            seen.set(seen.get() + 1);
            value.as_f64().map(|n| n + 1.0)
        });

        let first = mapped.get().unwrap();
        let second = mapped.get().unwrap();
        let handle = first.as_pending().cloned().unwrap();
        assert!(handle.ptr_eq(second.as_pending().unwrap()));
        assert_eq!(runs.get(), 0);

        resolver.resolve(1);
        assert_eq!(runs.get(), 1);
        assert_eq!(handle.result(), Some(Ok(2.into())));
    }

    #[test]
    fn map_over_settled_pending_is_synchronous() {
        let source = Cell::new(Pending::resolved(4));
        let mapped = source.map(|value| value.as_f64().map(|n| n / 2.0));
        let value = mapped.get().unwrap();
        assert_eq!(value.as_pending().and_then(Pending::result), Some(Ok(2.into())));
    }

    #[test]
    fn caching_put_calls_setter() {
        let written = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = Rc::clone(&written);
        let cached = Cell::caching(
            || 1,
            move |value| {
                sink.borrow_mut().push(value);
                Ok(())
            },
        );
        assert_eq!(cached.get(), Ok(1.into()));
        cached.put(7).unwrap();
        assert_eq!(cached.get(), Ok(7.into()));
        assert_eq!(*written.borrow(), vec![Value::from(7)]);
    }

    #[test]
    fn transform_error_leaves_cell_invalid() {
        let source = Cell::new(0);
        let checked = source.map(|value| match value.as_f64() {
            Some(n) if n > 0.0 => Ok(Value::from(n)),
            _ => Err(CellError::compute("must be positive")),
        });
        assert_eq!(checked.get(), Err(CellError::compute("must be positive")));
        assert!(!checked.is_valid());

        source.put(3).unwrap();
        assert_eq!(checked.get(), Ok(3.into()));
    }
}
