#![forbid(unsafe_code)]

//! Function values for applicative cells.
//!
//! A [`Function`] pairs a forward computation with an optional inverse. The
//! forward half turns argument values into a result; the inverse receives a
//! proposed result together with the argument cells and decides which of
//! them to `put` so the forward computation would produce it.

use std::fmt;
use std::rc::Rc;

use crate::cell::Cell;
use crate::error::Result;
use crate::value::{IntoComputed, Value};

type Forward = dyn Fn(&[Value]) -> Result<Value>;
type Inverse = dyn Fn(Value, &[Cell]) -> Result<()>;

/// A forward function with an optional inverse.
#[derive(Clone)]
pub struct Function {
    forward: Rc<Forward>,
    inverse: Option<Rc<Inverse>>,
}

impl Function {
    /// Wrap a forward computation.
    pub fn new<F, R>(forward: F) -> Self
    where
        F: Fn(&[Value]) -> R + 'static,
        R: IntoComputed,
    {
        Self {
            forward: Rc::new(move |args: &[Value]| forward(args).into_computed()),
            inverse: None,
        }
    }

    /// Attach the inverse used when a result is written back.
    #[must_use]
    pub fn with_inverse(mut self, inverse: impl Fn(Value, &[Cell]) -> Result<()> + 'static) -> Self {
        self.inverse = Some(Rc::new(inverse));
        self
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.forward)(args)
    }

    /// Run the inverse, or `None` if the function has none.
    pub fn invert(&self, value: Value, args: &[Cell]) -> Option<Result<()>> {
        self.inverse.as_ref().map(|inverse| inverse(value, args))
    }

    #[must_use]
    pub fn has_inverse(&self) -> bool {
        self.inverse.is_some()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.forward, &other.forward)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("invertible", &self.has_inverse())
            .finish()
    }
}
