#![forbid(unsafe_code)]

//! Schemas and validation.
//!
//! Every cell has a lazily created schema cell. A root cell's schema is a
//! plain source cell the host fills in; a property cell's schema is the
//! matching property of its parent's schema, so putting
//! `{ "a": "number" }` into a root's schema gives `root.property("a")` the
//! schema `"number"`.
//!
//! `cell.validate()` is a derived cell listing the [`Violation`]s of the
//! cell's value against its schema, as reported by the thread's
//! [`Validator`]. It depends on both the value and the schema, so it goes
//! stale when either changes.

use std::fmt;
use std::rc::Weak;

use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellInner, Kind};
use crate::error::{CellError, Result};
use crate::object::Object;
use crate::runtime;
use crate::value::Value;

/// One validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Dotted path to the offending field; empty for the value itself.
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// The object form stored in validate cells.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            [
                ("path", Value::from(self.path.as_str())),
                ("message", Value::from(self.message.as_str())),
            ]
            .into_iter()
            .collect::<Object>(),
        )
    }

    /// Read back the object form; `None` for anything else.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            path: object.get("path").as_str().unwrap_or_default().to_string(),
            message: object.get("message").as_str()?.to_string(),
        })
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Checks a value against a schema.
pub trait Validator {
    /// Violations of `value` against `schema`. An `Err` means the schema
    /// itself could not be applied.
    fn validate(&self, value: &Value, schema: &Value) -> Result<Vec<Violation>>;
}

impl<F> Validator for F
where
    F: Fn(&Value, &Value) -> Result<Vec<Violation>>,
{
    fn validate(&self, value: &Value, schema: &Value) -> Result<Vec<Violation>> {
        self(value, schema)
    }
}

/// Default validator: schemas are type names (`"number"`, `"string"`,
/// `"boolean"`, `"object"`, `"list"`/`"array"`, `"function"`, `"null"`,
/// `"undefined"`, `"any"`) or objects mapping field names to schemas.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeNameValidator;

impl Validator for TypeNameValidator {
    fn validate(&self, value: &Value, schema: &Value) -> Result<Vec<Violation>> {
        let mut violations = Vec::new();
        check("", value, schema, &mut violations)?;
        Ok(violations)
    }
}

fn check(path: &str, value: &Value, schema: &Value, out: &mut Vec<Violation>) -> Result<()> {
    match schema {
        Value::Undefined | Value::Null => Ok(()),
        Value::String(expected) => {
            if !type_matches(expected, value)? {
                out.push(Violation::new(
                    path,
                    format!("expected {expected}, found {}", value.type_name()),
                ));
            }
            Ok(())
        }
        Value::Object(fields) => {
            let Some(object) = value.as_object() else {
                out.push(Violation::new(
                    path,
                    format!("expected object, found {}", value.type_name()),
                ));
                return Ok(());
            };
            for (key, field_schema) in fields.entries() {
                let field_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                check(&field_path, &object.get(&key), &field_schema, out)?;
            }
            Ok(())
        }
        other => Err(CellError::validation(format!(
            "unsupported schema of type {}",
            other.type_name()
        ))),
    }
}

fn type_matches(expected: &str, value: &Value) -> Result<bool> {
    Ok(match expected {
        "any" => true,
        "array" | "list" => matches!(value, Value::List(_)),
        "number" | "string" | "boolean" | "object" | "function" | "null" | "undefined" => {
            value.type_name() == expected
        }
        unknown => {
            return Err(CellError::validation(format!("unknown type name `{unknown}`")));
        }
    })
}

impl Cell {
    /// The cell holding this cell's schema.
    pub fn schema(&self) -> Cell {
        self.inner
            .schema
            .get_or_init(|| match &self.inner.kind {
                Kind::Property { parent, key } => match parent.upgrade() {
                    Some(parent) => Cell::from_inner(parent).schema().property(key.clone()),
                    None => Cell::default(),
                },
                _ => Cell::default(),
            })
            .clone()
    }

    /// A cell listing the violations of this cell's value against its
    /// schema, as objects with `path` and `message` fields. An undefined
    /// schema yields an empty list.
    pub fn validate(&self) -> Cell {
        let live = self.inner.validator.borrow().upgrade();
        if let Some(inner) = live {
            return Cell::from_inner(inner);
        }
        let cell = Cell::with_kind(Kind::Validate {
            target: self.downgrade(),
        });
        *self.inner.validator.borrow_mut() = cell.downgrade();
        cell
    }

    /// Current violations, typed.
    pub fn violations(&self) -> Result<Vec<Violation>> {
        let report = self.validate().get()?;
        Ok(report
            .as_list()
            .map(|items| items.iter().filter_map(Violation::from_value).collect())
            .unwrap_or_default())
    }
}

pub(crate) fn compute(target: &Weak<CellInner>) -> Result<Value> {
    let Some(target) = target.upgrade().map(Cell::from_inner) else {
        return Ok(Value::List(Vec::new()));
    };
    let value = target.get()?;
    let schema = target.schema().get()?;
    if schema.is_undefined() {
        return Ok(Value::List(Vec::new()));
    }
    let violations = runtime::validator().validate(&value, &schema)?;
    tracing::trace!(cell = %target.id(), violations = violations.len(), "validated");
    Ok(Value::List(violations.iter().map(Violation::to_value).collect()))
}
