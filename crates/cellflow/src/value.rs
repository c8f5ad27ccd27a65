#![forbid(unsafe_code)]

//! The dynamic value carried by every cell.
//!
//! Cells are untyped: a single graph mixes numbers, records, lists, functions
//! (for applicative cells), nested cells (for flattening) and pending results
//! (for async derivations). [`Value`] is the closed set of those shapes.
//!
//! # Equality
//!
//! - Scalars, strings and lists compare structurally.
//! - Objects compare equal when they are the same allocation or hold equal
//!   fields.
//! - Cells, functions and pending handles compare by identity.
//!
//! # JSON
//!
//! `From<serde_json::Value>` builds fresh objects and lists.
//! [`Value::to_json`] exports data shapes; cells, functions and pending
//! handles export as `null`.

use std::fmt;

use crate::cell::Cell;
use crate::error::Result;
use crate::function::Function;
use crate::object::Object;
use crate::pending::Pending;

/// A dynamically-typed cell value.
#[derive(Clone, Default)]
pub enum Value {
    /// Not yet assigned or computed, or absent.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Object(Object),
    Function(Function),
    /// A cell used as a value. Reads flatten it into its current value.
    Cell(Cell),
    /// An asynchronous result that settles later.
    Pending(Pending),
}

impl Value {
    /// Name of the value's shape, as used by schema descriptors.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Cell(_) => "cell",
            Self::Pending(_) => "pending",
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integral numbers only.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_cell(&self) -> Option<&Cell> {
        match self {
            Self::Cell(cell) => Some(cell),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_pending(&self) -> Option<&Pending> {
        match self {
            Self::Pending(pending) => Some(pending),
            _ => None,
        }
    }

    /// Export the data part of the value as JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Undefined | Self::Null | Self::Function(_) | Self::Cell(_) | Self::Pending(_) => {
                Json::Null
            }
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => match self.as_i64() {
                Some(int) => Json::from(int),
                None => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
            },
            Self::String(s) => Json::String(s.clone()),
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(object) => Json::Object(
                object
                    .entries()
                    .into_iter()
                    .map(|(key, value)| (key, value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b) || a.entries() == b.entries(),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Cell(a), Self::Cell(b)) => a.ptr_eq(b),
            (Self::Pending(a), Self::Pending(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Object(object) => fmt::Debug::fmt(object, f),
            Self::Function(function) => fmt::Debug::fmt(function, f),
            Self::Cell(cell) => fmt::Debug::fmt(cell, f),
            Self::Pending(pending) => fmt::Debug::fmt(pending, f),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

macro_rules! number_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Number(value as f64)
                }
            }
        )*
    };
}

number_from!(i32, i64, u32, u64, usize, f32);

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Self::Object(value)
    }
}

impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Self::Function(value)
    }
}

impl From<Cell> for Value {
    fn from(value: Cell) -> Self {
        Self::Cell(value)
    }
}

impl From<&Cell> for Value {
    fn from(value: &Cell) -> Self {
        Self::Cell(value.clone())
    }
}

impl From<Pending> for Value {
    fn from(value: Pending) -> Self {
        Self::Pending(value)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Undefined
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Undefined, Into::into)
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::List(iter.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Json::Object(fields) => Self::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// IntoComputed
// ---------------------------------------------------------------------------

/// Return types accepted from transforms, getters and applicative functions.
///
/// Plain data converts to its [`Value`]; a [`Cell`] is flattened by the
/// engine; `Option::None` becomes `Undefined`; `Err` is propagated to the
/// reader.
pub trait IntoComputed {
    fn into_computed(self) -> Result<Value>;
}

macro_rules! computed_via_into {
    ($($ty:ty),*) => {
        $(
            impl IntoComputed for $ty {
                fn into_computed(self) -> Result<Value> {
                    Ok(Value::from(self))
                }
            }
        )*
    };
}

computed_via_into!(
    Value, bool, f64, f32, i32, i64, u32, u64, usize, String, &str, Vec<Value>, Object, Function,
    Cell, Pending, ()
);

impl<T: IntoComputed> IntoComputed for Option<T> {
    fn into_computed(self) -> Result<Value> {
        self.map_or(Ok(Value::Undefined), IntoComputed::into_computed)
    }
}

impl<T: IntoComputed> IntoComputed for Result<T> {
    fn into_computed(self) -> Result<Value> {
        self.and_then(IntoComputed::into_computed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CellError;
    use serde_json::json;

    #[test]
    fn type_names() {
        assert_eq!(Value::Undefined.type_name(), "undefined");
        assert_eq!(Value::from(1).type_name(), "number");
        assert_eq!(Value::from("x").type_name(), "string");
        assert_eq!(Value::from(vec![Value::Null]).type_name(), "list");
        assert_eq!(Value::from(Object::new()).type_name(), "object");
    }

    #[test]
    fn integral_numbers_only_as_i64() {
        assert_eq!(Value::from(4).as_i64(), Some(4));
        assert_eq!(Value::from(4.5).as_i64(), None);
        assert_eq!(Value::from(f64::NAN).as_i64(), None);
    }

    #[test]
    fn lists_compare_structurally() {
        let a: Value = vec![1, 2, 3].into_iter().collect();
        let b: Value = vec![1, 2, 3].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, Value::from(vec![Value::from(1)]));
    }

    #[test]
    fn objects_compare_by_identity_then_fields() {
        let a = Value::from(json!({ "a": 1 }));
        let b = Value::from(json!({ "a": 1 }));
        let c = Value::from(json!({ "a": 2 }));
        assert_eq!(a, a.clone());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cells_compare_by_identity() {
        let cell = Cell::new(1);
        let same = Value::from(&cell);
        assert_eq!(Value::from(cell.clone()), same);
        assert_ne!(Value::from(Cell::new(1)), same);
    }

    #[test]
    fn json_bridge() {
        let source = json!({ "name": "x", "tags": [1, true, null], "nested": { "k": 2.5 } });
        let value = Value::from(source.clone());
        assert_eq!(value.to_json(), source);
        assert_eq!(Value::from(Cell::new(1)).to_json(), json!(null));
    }

    #[test]
    fn option_converts_to_undefined() {
        assert_eq!(Value::from(None::<i32>), Value::Undefined);
        assert_eq!(Some(3).into_computed(), Ok(Value::from(3)));
        assert_eq!(None::<f64>.into_computed(), Ok(Value::Undefined));
    }

    #[test]
    fn errors_pass_through_into_computed() {
        let failed: Result<i32> = Err(CellError::compute("nope"));
        assert_eq!(failed.into_computed(), Err(CellError::compute("nope")));
    }
}
