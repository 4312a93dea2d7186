//! Tracked containers.
//!
//! A [`ReactiveObject`] owns one [`Property`] per field. Reading a field
//! through the container is a tracked read; writing one triggers
//! propagation. The container is itself an observable: every field's
//! property carries the container's bubble listener as its `parent`, so
//! field-level events also surface at the container, de-duplicated per run.
//!
//! Field names on the reserved list are refused - the name-based registry
//! layer claims them for its property-path accessors.

mod property;
mod val;

pub use property::{ComputeFn, Property};
pub use val::ReactiveVal;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::error::{Error, EvalError};
use crate::observe::{Event, Invoke, Listener, Observable, ObservableCore};
use crate::runtime::Runtime;
use crate::types::Value;

/// Field names no container may define.
pub const KEYWORD_FIELDS: &[&str] = &["p"];

pub(crate) struct ObjectInner {
    pub(crate) obs: ObservableCore,
    pub(crate) fields: RefCell<HashMap<Rc<str>, Property>>,
    bubble: RefCell<Option<Listener>>,
}

/// Handle to a tracked container. Clones alias the same container.
#[derive(Clone)]
pub struct ReactiveObject(pub(crate) Rc<ObjectInner>);

impl std::fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveObject")
            .field("fields", &self.field_names())
            .finish()
    }
}

impl Observable for ReactiveObject {
    fn core(&self) -> &ObservableCore {
        &self.0.obs
    }

    /// Container notifications re-emit the triggering field event with the
    /// chain preserved, so container listeners see what changed.
    fn make_event(&self, source: Option<&Event>) -> Event {
        match source {
            Some(src) => Event {
                kind: src.kind.clone(),
                source: Some(Rc::new(src.clone())),
            },
            None => Event::value(Value::Null),
        }
    }
}

impl ReactiveObject {
    pub fn new(rt: &Rc<Runtime>) -> ReactiveObject {
        ReactiveObject(Rc::new(ObjectInner {
            obs: ObservableCore::new(rt),
            fields: RefCell::new(HashMap::new()),
            bubble: RefCell::new(None),
        }))
    }

    /// Build a container from `(name, value)` pairs.
    pub fn from_pairs<I, S>(rt: &Rc<Runtime>, pairs: I) -> Result<ReactiveObject, Error>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let obj = ReactiveObject::new(rt);
        for (name, value) in pairs {
            obj.set(name.as_ref(), value)?;
        }
        Ok(obj)
    }

    /// Whether two handles alias the same container.
    pub fn same(&self, other: &ReactiveObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Tracked read. Unknown fields read as `Null`.
    pub fn get(&self, name: &str) -> Value {
        let prop = self.prop(name);
        match prop {
            Some(p) => p.get(),
            None => Value::Null,
        }
    }

    /// Write a field, creating it (and its property) when absent. Creation
    /// alone does not notify; only changes to existing fields do.
    pub fn set(&self, name: &str, value: Value) -> Result<(), Error> {
        let existing = self.prop(name);
        match existing {
            Some(p) => p.set(value),
            None => {
                self.make_prop(name, value)?;
                Ok(())
            }
        }
    }

    /// Define a computed field. Dependencies are discovered on first read:
    /// whatever tracked fields the function reads become its dependencies.
    pub fn computed<F>(&self, name: &str, f: F) -> Result<(), Error>
    where
        F: Fn(&ReactiveObject) -> Value + 'static,
    {
        self.try_computed(name, move |o| Ok(f(o)))
    }

    /// Fallible variant of [`computed`](Self::computed). Evaluation errors
    /// follow the flow's error policy.
    pub fn try_computed<F>(&self, name: &str, f: F) -> Result<(), Error>
    where
        F: Fn(&ReactiveObject) -> Result<Value, EvalError> + 'static,
    {
        self.check_keyword(name)?;
        let func: ComputeFn = Rc::new(f);
        let prop = Property::new_computed(&self.0, name, func);
        prop.core().set_parent(Some(self.bubble_listener()));
        // Redefining an existing field carries its subscribers over.
        if let Some(old) = self.0.fields.borrow().get(name) {
            for (_, l) in old.core().listeners().extract(|_| true) {
                prop.core().on(l);
            }
        }
        self.0.fields.borrow_mut().insert(Rc::from(name), prop);
        Ok(())
    }

    /// The property wrapper of a field.
    pub fn prop(&self, name: &str) -> Option<Property> {
        self.0.fields.borrow().get(name).cloned()
    }

    /// Field names, sorted for determinism.
    pub fn field_names(&self) -> Vec<Rc<str>> {
        let mut names: Vec<Rc<str>> = self.0.fields.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    fn check_keyword(&self, name: &str) -> Result<(), Error> {
        if KEYWORD_FIELDS.contains(&name) {
            return Err(Error::ReservedField(name.to_string()));
        }
        Ok(())
    }

    fn make_prop(&self, name: &str, value: Value) -> Result<Property, Error> {
        self.check_keyword(name)?;
        Ok(self.insert_prop(name, value))
    }

    fn insert_prop(&self, name: &str, value: Value) -> Property {
        let prop = Property::new(&self.0, name, value);
        prop.core().set_parent(Some(self.bubble_listener()));
        self.0
            .fields
            .borrow_mut()
            .insert(Rc::from(name), prop.clone());
        prop
    }

    /// The always-notified receiver installed as every property's parent.
    /// One shared instance per container, so multiple field events in one
    /// run collapse to a single container notification.
    pub(crate) fn bubble_listener(&self) -> Listener {
        if let Some(b) = self.0.bubble.borrow().clone() {
            return b;
        }
        let b: Listener = Rc::new(ObjectBinding(Rc::downgrade(&self.0)));
        *self.0.bubble.borrow_mut() = Some(b.clone());
        b
    }
}

/// Bubbles field events up to the container's own listeners.
struct ObjectBinding(Weak<ObjectInner>);

impl Invoke for ObjectBinding {
    fn invoke(&self, event: &Event) -> Result<(), EvalError> {
        let Some(inner) = self.0.upgrade() else {
            return Ok(());
        };
        ReactiveObject(inner)
            .update(Some(event))
            .map_err(EvalError::from)
    }
}
