//! Single reactive value - a container with one tracked field.
//!
//! The workhorse behind derived scalars: `reduce` over a stream, the live
//! vec queries (`live_every`, `live_index_of`, ...). Everything observable
//! about a [`ReactiveVal`] delegates to its one property, so subscribing to
//! the val is subscribing to the field.

use std::rc::Rc;

use crate::error::Error;
use crate::observe::{Event, Listener, Observable, ObservableCore};
use crate::runtime::Runtime;
use crate::types::Value;

use super::{Property, ReactiveObject};

/// A single tracked value.
#[derive(Clone)]
pub struct ReactiveVal {
    obj: ReactiveObject,
    prop: Property,
}

impl std::fmt::Debug for ReactiveVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveVal").finish_non_exhaustive()
    }
}

impl Observable for ReactiveVal {
    fn core(&self) -> &ObservableCore {
        self.prop.core()
    }

    fn make_listener(&self) -> Option<Listener> {
        self.prop.make_listener()
    }

    fn make_event(&self, source: Option<&Event>) -> Event {
        self.prop.make_event(source)
    }
}

impl ReactiveVal {
    pub fn new(rt: &Rc<Runtime>, initial: Value) -> ReactiveVal {
        let obj = ReactiveObject::new(rt);
        let prop = obj.insert_prop("v", initial);
        ReactiveVal { obj, prop }
    }

    /// Tracked read of the value.
    pub fn get(&self) -> Value {
        self.prop.get()
    }

    /// Write the value and propagate.
    pub fn set(&self, v: Value) -> Result<(), Error> {
        self.prop.set(v)
    }

    /// The value before the most recent change.
    pub fn previous(&self) -> Value {
        self.prop.previous()
    }

    /// The underlying property.
    pub fn prop(&self) -> &Property {
        &self.prop
    }

    /// The backing one-field container.
    pub fn object(&self) -> &ReactiveObject {
        &self.obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{listener, ObservableExt};
    use std::cell::RefCell;

    #[test]
    fn test_get_set_notify() {
        let rt = Runtime::new();
        let val = ReactiveVal::new(&rt, Value::Int(1));
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        val.on(listener(move |e| {
            l.borrow_mut().push(e.payload().and_then(|v| v.as_int()));
        }));
        assert_eq!(val.get(), Value::Int(1));
        val.set(Value::Int(2)).unwrap();
        assert_eq!(val.get(), Value::Int(2));
        assert_eq!(val.previous(), Value::Int(1));
        assert_eq!(*log.borrow(), vec![Some(2)]);
    }

    #[test]
    fn test_val_is_a_dependency_like_any_field() {
        let rt = Runtime::new();
        let val = ReactiveVal::new(&rt, Value::Int(4));
        let obj = ReactiveObject::new(&rt);
        let v = val.clone();
        obj.computed("doubled", move |_| {
            Value::Int(v.get().as_int().unwrap_or(0) * 2)
        })
        .unwrap();
        assert_eq!(obj.get("doubled"), Value::Int(8));
        val.set(Value::Int(5)).unwrap();
        assert_eq!(obj.get("doubled"), Value::Int(10));
    }
}
