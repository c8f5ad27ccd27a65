#![forbid(unsafe_code)]

//! Field-change observation collaborator.
//!
//! Property cells learn about external mutation of the objects they read
//! through a [`ChangeObserver`]. The engine asks it to watch one
//! `(object, key)` pair per property cell and keeps the returned [`Watch`]
//! alive until the cell stops reading that object.
//!
//! [`FieldHooks`] is the default observer: it uses the synchronous field
//! listeners built into [`Object`]. Hosts that detect mutation some other way
//! install their own implementation with
//! [`runtime::set_change_observer`](crate::runtime::set_change_observer).

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::object::Object;

/// Reports field-level changes on objects used as cell values.
pub trait ChangeObserver {
    /// Call `on_change` whenever `object[key]` changes, until the returned
    /// [`Watch`] is dropped.
    fn watch(&self, object: &Object, key: &str, on_change: Rc<dyn Fn()>) -> Watch;
}

/// RAII guard for a registration made by a [`ChangeObserver`].
///
/// The guard owns whatever keeps the registration alive; dropping it ends
/// the registration.
pub struct Watch {
    _guard: Option<Box<dyn Any>>,
}

impl Watch {
    /// A watch whose registration lives as long as `guard`.
    #[must_use]
    pub fn holding(guard: impl Any) -> Self {
        Self {
            _guard: Some(Box::new(guard)),
        }
    }

    /// A watch with nothing to release.
    #[must_use]
    pub fn detached() -> Self {
        Self { _guard: None }
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("attached", &self._guard.is_some())
            .finish()
    }
}

/// Default observer backed by [`Object::watch_field`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldHooks;

impl ChangeObserver for FieldHooks {
    fn watch(&self, object: &Object, key: &str, on_change: Rc<dyn Fn()>) -> Watch {
        object.watch_field(key, on_change)
    }
}
