//! Events - the notification currency of the graph.
//!
//! One event is created per notification and never mutated afterwards.
//! Events chain through `source`: a field change bubbling to its container,
//! or a cascaded notification into a dependent property, carries the event
//! that caused it.

use std::rc::Rc;

use crate::collections::VecChange;
use crate::error::EvalError;
use crate::types::Value;

/// What a notification describes.
#[derive(Clone, Debug)]
pub enum EventKind {
    /// A value changed. `field` names the property for field-level events;
    /// stream payloads leave it empty and carry the value in `new`.
    Value {
        field: Option<Rc<str>>,
        old: Value,
        new: Value,
    },
    /// A structural change on a reactive sequence.
    Vec(VecChange),
    /// The source is done emitting.
    Close,
    /// An evaluation failure turned into an observable event.
    Error(EvalError),
}

/// An immutable notification.
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    /// The upstream event that caused this one, if any.
    pub source: Option<Rc<Event>>,
}

impl Event {
    /// A plain value payload (stream triggers).
    pub fn value(v: Value) -> Event {
        Event {
            kind: EventKind::Value {
                field: None,
                old: Value::Null,
                new: v,
            },
            source: None,
        }
    }

    /// A field-level change on a tracked container.
    pub fn field_change(field: Rc<str>, old: Value, new: Value) -> Event {
        Event {
            kind: EventKind::Value {
                field: Some(field),
                old,
                new,
            },
            source: None,
        }
    }

    /// A structural change on a reactive sequence.
    pub fn vec(change: VecChange) -> Event {
        Event {
            kind: EventKind::Vec(change),
            source: None,
        }
    }

    pub fn close() -> Event {
        Event {
            kind: EventKind::Close,
            source: None,
        }
    }

    pub fn error(e: EvalError) -> Event {
        Event {
            kind: EventKind::Error(e),
            source: None,
        }
    }

    /// Attach the upstream event that caused this one.
    pub fn caused_by(mut self, source: Option<&Event>) -> Event {
        self.source = source.map(|e| Rc::new(e.clone()));
        self
    }

    /// The new value, for value-kind events.
    pub fn payload(&self) -> Option<&Value> {
        match &self.kind {
            EventKind::Value { new, .. } => Some(new),
            _ => None,
        }
    }

    /// The structural change, for sequence events.
    pub fn vec_change(&self) -> Option<&VecChange> {
        match &self.kind {
            EventKind::Vec(change) => Some(change),
            _ => None,
        }
    }

    /// The error, for error-kind events.
    pub fn error_payload(&self) -> Option<&EvalError> {
        match &self.kind {
            EventKind::Error(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_accessors() {
        let e = Event::value(Value::Int(4));
        assert_eq!(e.payload(), Some(&Value::Int(4)));
        assert!(e.vec_change().is_none());
        assert!(Event::close().payload().is_none());
    }

    #[test]
    fn test_source_chain() {
        let root = Event::value(Value::Int(1));
        let bubbled = Event::value(Value::Int(2)).caused_by(Some(&root));
        let src = bubbled.source.as_ref().unwrap();
        assert_eq!(src.payload(), Some(&Value::Int(1)));
    }

    #[test]
    fn test_error_event_carries_failure() {
        let e = Event::error(EvalError::new("bad"));
        assert_eq!(e.error_payload(), Some(&EvalError::new("bad")));
    }
}
