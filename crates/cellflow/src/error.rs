#![forbid(unsafe_code)]

//! Error taxonomy for cell reads and writes.
//!
//! Absence is never an error: a cell that has not been assigned, a property
//! missing from its object, or a cell without a schema all read as
//! [`Value::Undefined`](crate::Value::Undefined) (or an empty violation list).
//! Errors are reserved for failures a caller has to act on.
//!
//! `CellError` is `Clone` because a settled [`Pending`](crate::Pending) hands
//! the same result to every continuation and every awaiting future.

use thiserror::Error;

use crate::cell::CellId;

pub type Result<T> = std::result::Result<T, CellError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    /// A transform, getter, setter, or inverse reported a failure.
    #[error("compute failed: {message}")]
    Compute { message: String },

    /// The validation collaborator could not evaluate a schema.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// `put` on an applicative cell whose function carries no inverse.
    #[error("cell {cell} has no inverse function to accept a written value")]
    NoInverse { cell: CellId },

    /// A cell was read while its own recompute was still running.
    #[error("cell {cell} read itself while recomputing")]
    Cycle { cell: CellId },

    /// Recompute nesting went past [`GraphConfig::max_depth`](crate::GraphConfig::max_depth).
    #[error("recompute nesting exceeded {limit} levels")]
    DepthExceeded { limit: usize },

    /// An operation met a value of the wrong shape.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A list element write more than one past the end of the list.
    #[error("index {index} is out of range for a list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// A pending value was rejected.
    #[error("pending value rejected: {reason}")]
    Rejected { reason: String },
}

impl CellError {
    /// Failure raised from user code inside a computation.
    #[must_use]
    pub fn compute(message: impl Into<String>) -> Self {
        Self::Compute {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn type_mismatch(expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch { expected, found }
    }

    /// Whether the error reports a structural problem in the graph rather
    /// than a failure inside user code.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Cycle { .. } | Self::DepthExceeded { .. })
    }
}
