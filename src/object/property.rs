//! Property - the per-field wrapper that makes a container field reactive.
//!
//! Reads go through [`Property::get`], which records the current evaluator
//! as a listener (dependency auto-tracking). Writes go through
//! [`Property::set`], which applies the transform pipeline, migrates peer
//! listeners on wholesale nested replacement, reprobes the kind when the
//! value class changes, and triggers propagation.
//!
//! A property's kind is a tagged variant replaced in place on reprobe, so
//! the listener set survives kind transitions without any transplanting -
//! the node identity never changes.
//!
//! Computed fields evaluate under an evaluation-context scope: any tracked
//! read during the call registers this property's binding as a listener on
//! the field that was read. First evaluation happens inside a nested flow
//! run so it fully settles before the caller continues; re-evaluation runs
//! as an ordinary queued listener invocation.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::collections::{Channels, ReactiveVec};
use crate::error::{Error, EvalError};
use crate::observe::{
    apply_transforms, Event, Invoke, Listener, Observable, ObservableCore, Transformed,
};
use crate::types::Value;

use super::{ObjectInner, ReactiveObject};

/// A computed-field function. Reads performed through the passed container
/// (or any other tracked handle) are auto-tracked as dependencies.
pub type ComputeFn = Rc<dyn Fn(&ReactiveObject) -> Result<Value, EvalError>>;

/// The representation of a field, replaced in place on reprobe.
pub(crate) enum Kind {
    /// Field currently holding `Null`.
    Null,
    /// Scalar payload.
    Plain,
    /// Derived from a user function; writes are ignored.
    Computed { func: ComputeFn, primed: Cell<bool> },
    /// Holds a nested tracked container.
    Object,
    /// Holds a nested reactive sequence.
    Vec,
}

impl Kind {
    fn for_value(v: &Value) -> Kind {
        match v {
            Value::Null => Kind::Null,
            Value::Vec(_) => Kind::Vec,
            Value::Object(_) => Kind::Object,
            _ => Kind::Plain,
        }
    }

    fn class(&self) -> u8 {
        match self {
            Kind::Null => 0,
            Kind::Plain => 1,
            Kind::Computed { .. } => 2,
            Kind::Object => 3,
            Kind::Vec => 4,
        }
    }
}

pub(crate) struct PropertyInner {
    obs: ObservableCore,
    owner: Weak<ObjectInner>,
    name: Rc<str>,
    value: RefCell<Value>,
    old: RefCell<Value>,
    kind: RefCell<Kind>,
    binding: RefCell<Option<Listener>>,
}

/// Handle to one field's wrapper. Clones alias the same field.
#[derive(Clone)]
pub struct Property(pub(crate) Rc<PropertyInner>);

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.0.name)
            .finish_non_exhaustive()
    }
}

impl Observable for Property {
    fn core(&self) -> &ObservableCore {
        &self.0.obs
    }

    fn make_listener(&self) -> Option<Listener> {
        Some(self.binding())
    }

    fn make_event(&self, source: Option<&Event>) -> Event {
        Event::field_change(
            self.0.name.clone(),
            self.0.old.borrow().clone(),
            self.0.value.borrow().clone(),
        )
        .caused_by(source)
    }
}

impl Property {
    pub(crate) fn new(owner: &Rc<ObjectInner>, name: &str, value: Value) -> Property {
        let kind = Kind::for_value(&value);
        Property(Rc::new(PropertyInner {
            obs: ObservableCore::new(owner.obs.runtime()),
            owner: Rc::downgrade(owner),
            name: Rc::from(name),
            value: RefCell::new(value),
            old: RefCell::new(Value::Null),
            kind: RefCell::new(kind),
            binding: RefCell::new(None),
        }))
    }

    pub(crate) fn new_computed(owner: &Rc<ObjectInner>, name: &str, func: ComputeFn) -> Property {
        Property(Rc::new(PropertyInner {
            obs: ObservableCore::new(owner.obs.runtime()),
            owner: Rc::downgrade(owner),
            name: Rc::from(name),
            value: RefCell::new(Value::Null),
            old: RefCell::new(Value::Null),
            kind: RefCell::new(Kind::Computed {
                func,
                primed: Cell::new(false),
            }),
            binding: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_computed(&self) -> bool {
        matches!(&*self.0.kind.borrow(), Kind::Computed { .. })
    }

    /// Whether two handles alias the same field wrapper.
    pub fn same(&self, other: &Property) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn owner_is(&self, owner: &Weak<ObjectInner>) -> bool {
        Weak::ptr_eq(&self.0.owner, owner)
    }

    /// Tracked read. Records the current evaluator as a dependency and, for
    /// an unevaluated computed field, evaluates it first (inside a nested
    /// flow run, so the evaluation fully settles before this call returns).
    pub fn get(&self) -> Value {
        self.add_caller();
        let needs_prime = matches!(
            &*self.0.kind.borrow(),
            Kind::Computed { primed, .. } if !primed.get()
        );
        if needs_prime {
            self.prime();
        }
        self.0.value.borrow().clone()
    }

    /// The value before the most recent change.
    pub fn previous(&self) -> Value {
        self.0.old.borrow().clone()
    }

    /// Write the field. Applies the transform pipeline, migrates peer
    /// listeners when a nested value is replaced wholesale, reprobes on a
    /// kind change, and propagates. Writes to computed fields are ignored;
    /// writes of the current value are no-ops.
    pub fn set(&self, v: Value) -> Result<(), Error> {
        if self.is_computed() {
            return Ok(());
        }
        let current = self.0.value.borrow().clone();
        if current == v {
            return Ok(());
        }

        let transforms = self.0.obs.transforms_snapshot();
        let v = match apply_transforms(&transforms, v).map_err(Error::Eval)? {
            Transformed::Value(v) => v,
            // Suppressed writes neither store nor propagate.
            Transformed::Suppressed => return Ok(()),
        };
        if current == v {
            return Ok(());
        }

        match (&current, &v) {
            (Value::Object(old), Value::Object(new)) => self.migrate_object_peers(old, new),
            (Value::Vec(old), Value::Vec(new)) => self.migrate_vec_peers(old, new),
            _ => {}
        }

        *self.0.old.borrow_mut() = current;
        *self.0.value.borrow_mut() = v.clone();

        let next_kind = Kind::for_value(&v);
        if next_kind.class() != self.0.kind.borrow().class() {
            self.reprobe(next_kind);
        }
        self.update(None)
    }

    /// Swap the field's representation in place. The listener set lives on
    /// the node, not the variant, so subscribers survive the transition.
    fn reprobe(&self, next: Kind) {
        tracing::trace!(
            target: "spark_flow::property",
            field = %self.0.name,
            from = self.0.kind.borrow().class(),
            to = next.class(),
            "reprobe"
        );
        *self.0.kind.borrow_mut() = next;
    }

    /// Move listeners that peer properties of the same container registered
    /// on the old nested object's fields over to the new object's matching
    /// fields. Listeners belonging to unrelated consumers stay put.
    fn migrate_object_peers(&self, old: &ReactiveObject, new: &ReactiveObject) {
        for name in old.field_names() {
            let Some(old_prop) = old.prop(&name) else {
                continue;
            };
            let Some(new_prop) = new.prop(&name) else {
                continue;
            };
            let owner = &self.0.owner;
            let moved = old_prop
                .core()
                .listeners()
                .extract(|l| l.property().is_some_and(|p| p.owner_is(owner)));
            for (_, l) in moved {
                if !new_prop.core().has_listener(&l) {
                    new_prop.core().on(l);
                }
            }
        }
    }

    /// Same migration for nested sequences: index and length listeners
    /// registered by peer properties follow the replacement.
    fn migrate_vec_peers(&self, old: &ReactiveVec, new: &ReactiveVec) {
        let owner = &self.0.owner;
        for ch in [Channels::INDEX, Channels::LENGTH] {
            let moved = old
                .listener_set(ch)
                .extract(|l| l.property().is_some_and(|p| p.owner_is(owner)));
            for (_, l) in moved {
                if !new.listener_set(ch).contains(&l) {
                    new.on(ch, l);
                }
            }
        }
    }

    /// The subscription face of this property: registered on sources by
    /// `add_source` and on dependencies by auto-tracking. Memoized so its
    /// identity is stable - that identity is the de-duplication key.
    pub(crate) fn binding(&self) -> Listener {
        if let Some(b) = self.0.binding.borrow().clone() {
            return b;
        }
        let b: Listener = Rc::new(PropertyBinding(Rc::downgrade(&self.0)));
        *self.0.binding.borrow_mut() = Some(b.clone());
        b
    }

    /// Register the current evaluator as a listener of this property.
    pub(crate) fn add_caller(&self) {
        let Some(caller) = self.0.obs.runtime().current_evaluator() else {
            return;
        };
        if let Some(p) = caller.property()
            && Rc::ptr_eq(&p.0, &self.0)
        {
            return;
        }
        if !self.0.obs.has_listener(&caller) {
            self.0.obs.on(caller);
        }
    }

    /// First evaluation, bracketed in its own flow run.
    fn prime(&self) {
        let rt = self.0.obs.runtime().clone();
        let this = self.clone();
        let result = rt.flow().run(|| this.evaluate().map_err(Error::Eval));
        if let Err(e) = result {
            tracing::error!(
                target: "spark_flow::property",
                field = %self.0.name,
                error = %e,
                "computed field evaluation failed"
            );
        }
    }

    /// Evaluate the computed function under an evaluation-context scope and
    /// store the (transformed) result.
    pub(crate) fn evaluate(&self) -> Result<(), EvalError> {
        let func = match &*self.0.kind.borrow() {
            Kind::Computed { func, .. } => func.clone(),
            _ => return Ok(()),
        };
        let Some(owner) = self.0.owner.upgrade() else {
            return Ok(());
        };
        let owner = ReactiveObject(owner);
        let rt = self.0.obs.runtime().clone();
        let result = {
            let _scope = rt.enter_eval(self.binding());
            func(&owner)
        }?;
        let transforms = self.0.obs.transforms_snapshot();
        if let Transformed::Value(v) = apply_transforms(&transforms, result)? {
            *self.0.value.borrow_mut() = v;
        }
        if let Kind::Computed { primed, .. } = &*self.0.kind.borrow() {
            primed.set(true);
        }
        Ok(())
    }
}

/// The listener face of a property.
struct PropertyBinding(Weak<PropertyInner>);

impl Invoke for PropertyBinding {
    fn invoke(&self, event: &Event) -> Result<(), EvalError> {
        let Some(inner) = self.0.upgrade() else {
            return Ok(());
        };
        let prop = Property(inner);
        if prop.is_computed() {
            let old = prop.0.value.borrow().clone();
            *prop.0.old.borrow_mut() = old;
            return prop.evaluate();
        }
        // Fed from a source this property subscribed into: adopt the payload.
        let Some(v) = event.payload() else {
            return Ok(());
        };
        let transforms = prop.0.obs.transforms_snapshot();
        if let Transformed::Value(next) = apply_transforms(&transforms, v.clone())? {
            let old = prop.0.value.borrow().clone();
            if old != next {
                *prop.0.old.borrow_mut() = old;
                *prop.0.value.borrow_mut() = next;
            }
        }
        Ok(())
    }

    fn property(&self) -> Option<Property> {
        self.0.upgrade().map(Property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{listener, ObservableExt};
    use crate::runtime::Runtime;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn test_set_and_get_round_trip() {
        let rt = Runtime::new();
        let obj = ReactiveObject::new(&rt);
        obj.set("x", Value::Int(1)).unwrap();
        let p = obj.prop("x").unwrap();
        assert_eq!(p.get(), Value::Int(1));
        p.set(Value::Int(2)).unwrap();
        assert_eq!(p.get(), Value::Int(2));
        assert_eq!(p.previous(), Value::Int(1));
    }

    #[test]
    fn test_same_value_write_is_silent() {
        let rt = Runtime::new();
        let obj = ReactiveObject::new(&rt);
        obj.set("x", Value::Int(1)).unwrap();
        let p = obj.prop("x").unwrap();
        let hits = Rc::new(StdRefCell::new(0));
        let h = hits.clone();
        p.on(listener(move |_| *h.borrow_mut() += 1));
        p.set(Value::Int(1)).unwrap();
        assert_eq!(*hits.borrow(), 0);
        p.set(Value::Int(2)).unwrap();
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn test_reprobe_null_to_typed_keeps_listeners() {
        let rt = Runtime::new();
        let obj = ReactiveObject::new(&rt);
        obj.set("x", Value::Null).unwrap();
        let p = obj.prop("x").unwrap();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let l = log.clone();
        p.on(listener(move |e| {
            l.borrow_mut().push(e.payload().cloned());
        }));

        p.set(Value::Int(9)).unwrap();
        assert!(!p.is_computed());
        // The same handle, the same listeners, a new kind.
        assert_eq!(*log.borrow(), vec![Some(Value::Int(9))]);
        assert!(obj.prop("x").unwrap().same(&p));
    }

    #[test]
    fn test_write_to_computed_is_ignored() {
        let rt = Runtime::new();
        let obj = ReactiveObject::new(&rt);
        obj.set("a", Value::Int(1)).unwrap();
        obj.computed("c", |o| Value::Int(o.get("a").as_int().unwrap_or(0) + 1))
            .unwrap();
        let p = obj.prop("c").unwrap();
        assert_eq!(p.get(), Value::Int(2));
        p.set(Value::Int(99)).unwrap();
        assert_eq!(p.get(), Value::Int(2));
    }

    #[test]
    fn test_property_transform_applies_on_write() {
        let rt = Runtime::new();
        let obj = ReactiveObject::new(&rt);
        obj.set("x", Value::Int(0)).unwrap();
        let p = obj.prop("x").unwrap();
        p.mapping(|v| Value::Int(v.as_int().unwrap_or(0) * 10));
        p.set(Value::Int(3)).unwrap();
        assert_eq!(p.get(), Value::Int(30));
    }

    #[test]
    fn test_filtering_transform_suppresses_write() {
        let rt = Runtime::new();
        let obj = ReactiveObject::new(&rt);
        obj.set("x", Value::Int(2)).unwrap();
        let p = obj.prop("x").unwrap();
        p.filtering(|v| v.as_int().map(|n| n % 2 == 0).unwrap_or(false));
        p.set(Value::Int(5)).unwrap();
        assert_eq!(p.get(), Value::Int(2));
        p.set(Value::Int(4)).unwrap();
        assert_eq!(p.get(), Value::Int(4));
    }
}
