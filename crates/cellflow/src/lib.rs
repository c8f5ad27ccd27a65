#![forbid(unsafe_code)]

//! Lazy reactive cells with dynamic dependency tracking.
//!
//! - [`Cell`]: a shared container for a [`Value`]. Source cells change via
//!   [`Cell::put`]; derived cells ([`map`](Cell::map), [`each`](Cell::each),
//!   [`apply`](Cell::apply), [`caching`](Cell::caching),
//!   [`property`](Cell::property), [`validate`](Cell::validate)) recompute
//!   lazily on read.
//! - [`Observer`]: anything told when a cell it watches goes stale. Closures
//!   and cells are observers.
//! - [`Object`]: a shared record whose fields property cells bind to.
//! - [`Function`]: forward computation plus optional inverse, for applicative
//!   cells that can be written through.
//! - [`Pending`] / [`Resolver`]: single-threaded results that settle later;
//!   derivations over them continue once they settle.
//!
//! # Architecture
//!
//! Reads inside a recompute are recorded on a thread-local frame stack (see
//! [`runtime`]); the recorded cells become the recomputed cell's
//! dependencies, so the graph rewires itself on every recompute. Writes run
//! an invalidation pass that marks every affected cell stale before any
//! observer runs, then notifies each affected cell's observers once.
//!
//! Cells are `Rc`-based and `!Send`: one graph per thread.
//!
//! # Invariants
//!
//! 1. A valid cell's `get()` never runs user code.
//! 2. After any `put` returns, no cell that transitively depends on the
//!    written cell reports valid with an old value.
//! 3. Each observer of an affected cell is notified once per pass.
//! 4. A property write notifies the parent's observers and leaves sibling
//!    properties valid.

pub mod cell;
pub mod config;
mod derive;
pub mod error;
pub mod function;
pub mod object;
pub mod observe;
pub mod pending;
mod propagate;
mod property;
pub mod runtime;
pub mod schema;
pub mod value;

pub use cell::{Cell, CellId, Event, Observer};
pub use config::GraphConfig;
pub use error::{CellError, Result};
pub use function::Function;
pub use object::Object;
pub use observe::{ChangeObserver, FieldHooks, Watch};
pub use pending::{Pending, Resolver};
pub use schema::{TypeNameValidator, Validator, Violation};
pub use value::{IntoComputed, Value};
