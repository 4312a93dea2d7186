//! Push streams.
//!
//! A [`Stream`] is a push-only observable: values arrive by `trigger`, run
//! the transform pipeline (a suppressed value stops right there), and go out
//! to listeners through the flow. Unlike property notifications, plain
//! stream listeners receive every event - de-duplication is reserved for
//! property bindings subscribed into the stream.
//!
//! Lifetime follows the source: a stream's subscription face holds the
//! stream alive, so a derived chain like `s.map(f).filter(g)` keeps its
//! intermediate stages for as long as `s` lives. Two streams subscribed
//! into each other therefore keep each other alive; break such loops with
//! `remove_source`.

mod buffered;
mod timed;

pub use buffered::SizeBufferedStream;
pub use timed::{DebouncingStream, DelayedStream, ThrottlingStream};

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::{Error, EvalError};
use crate::object::ReactiveVal;
use crate::observe::{
    apply_transforms, ActionKey, Event, EventKind, Invoke, Listener, Observable, ObservableCore,
    ObservableExt, Transformed,
};
use crate::runtime::Runtime;
use crate::types::Value;

pub(crate) struct StreamInner {
    obs: ObservableCore,
    binding: RefCell<Option<Weak<dyn Invoke>>>,
    err_binding: RefCell<Option<Weak<dyn Invoke>>>,
}

/// A push-only observable. Clones alias the same stream.
#[derive(Clone)]
pub struct Stream(pub(crate) Rc<StreamInner>);

/// Weak stream handle (used by the runtime's error-stream slot).
pub(crate) struct WeakStream(Weak<StreamInner>);

impl WeakStream {
    pub(crate) fn new() -> WeakStream {
        WeakStream(Weak::new())
    }

    pub(crate) fn upgrade(&self) -> Option<Stream> {
        self.0.upgrade().map(Stream)
    }
}

impl Observable for Stream {
    fn core(&self) -> &ObservableCore {
        &self.0.obs
    }

    fn make_listener(&self) -> Option<Listener> {
        if let Some(b) = self.0.binding.borrow().as_ref().and_then(Weak::upgrade) {
            return Some(b);
        }
        // The binding holds the stream strongly: registering it on a source
        // hands the stream's lifetime to that source.
        let b: Rc<dyn Invoke> = Rc::new(StreamBinding(self.clone()));
        *self.0.binding.borrow_mut() = Some(Rc::downgrade(&b));
        Some(b)
    }

    fn make_err_listener(&self) -> Option<Listener> {
        if let Some(b) = self.0.err_binding.borrow().as_ref().and_then(Weak::upgrade) {
            return Some(b);
        }
        let b: Rc<dyn Invoke> = Rc::new(StreamErrBinding(self.clone()));
        *self.0.err_binding.borrow_mut() = Some(Rc::downgrade(&b));
        Some(b)
    }

    /// Streams pass the triggering event through unchanged.
    fn make_event(&self, source: Option<&Event>) -> Event {
        match source {
            Some(e) => e.clone(),
            None => Event::value(Value::Null),
        }
    }

    /// Every event reaches plain listeners; property bindings collapse to
    /// one delivery per run as everywhere else.
    fn defer(&self, event: &Rc<Event>, l: &Listener) -> Result<(), Error> {
        stream_defer(self.core(), event, l)
    }
}

/// Push-delivery policy shared by the whole stream family.
pub(crate) fn stream_defer(
    core: &ObservableCore,
    event: &Rc<Event>,
    l: &Listener,
) -> Result<(), Error> {
    let flow = core.runtime().flow();
    if l.property().is_some() {
        flow.push_once(None, ActionKey::of(l), l.clone(), event.clone())
    } else {
        flow.push(None, ActionKey::of(l), l.clone(), event.clone())
    }
}

impl Stream {
    pub fn new(rt: &Rc<Runtime>) -> Stream {
        Stream(Rc::new(StreamInner {
            obs: ObservableCore::new(rt),
            binding: RefCell::new(None),
            err_binding: RefCell::new(None),
        }))
    }

    /// A stream subscribed into `source`.
    pub fn from_source(rt: &Rc<Runtime>, source: &dyn Observable) -> Stream {
        let s = Stream::new(rt);
        s.add_source(source);
        s
    }

    /// Whether two handles alias the same stream.
    pub fn same(&self, other: &Stream) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakStream {
        WeakStream(Rc::downgrade(&self.0))
    }

    /// Push a value into the stream.
    pub fn trigger(&self, v: Value) -> Result<(), Error> {
        self.trigger_event(Event::value(v), true)
    }

    /// Push an event, optionally running the transform pipeline. A transform
    /// failure becomes an error-stream notification; a suppressed value
    /// stops here.
    pub fn trigger_event(&self, event: Event, transform: bool) -> Result<(), Error> {
        let event = if transform {
            match &event.kind {
                EventKind::Value { field, old, new } => {
                    let transforms = self.core().transforms_snapshot();
                    match apply_transforms(&transforms, new.clone()) {
                        Ok(Transformed::Value(v)) => Event {
                            kind: EventKind::Value {
                                field: field.clone(),
                                old: old.clone(),
                                new: v,
                            },
                            source: event.source.clone(),
                        },
                        Ok(Transformed::Suppressed) => return Ok(()),
                        Err(e) => return self.trigger_err(e),
                    }
                }
                _ => event,
            }
        } else {
            event
        };
        self.update(Some(&event))
    }

    /// Push an evaluation failure to the error listeners.
    pub fn trigger_err(&self, e: EvalError) -> Result<(), Error> {
        self.update_err(&e)
    }

    /// Deliver a close-kind event.
    pub fn close(&self) -> Result<(), Error> {
        self.update(Some(&Event::close()))
    }

    /// A new stream carrying `f` of every value.
    pub fn map<F>(&self, f: F) -> Stream
    where
        F: Fn(&Value) -> Value + 'static,
    {
        let s = Stream::from_source(self.core().runtime(), self);
        s.mapping(f);
        s
    }

    /// A new stream passing only values `f` accepts.
    pub fn filter<F>(&self, f: F) -> Stream
    where
        F: Fn(&Value) -> bool + 'static,
    {
        let s = Stream::from_source(self.core().runtime(), self);
        s.filtering(f);
        s
    }

    /// A new stream carrying the running fold of incoming values.
    pub fn accumulate<F>(&self, init: Value, f: F) -> Stream
    where
        F: Fn(&Value, &Value) -> Value + 'static,
    {
        let s = Stream::from_source(self.core().runtime(), self);
        s.accumulation(init, f);
        s
    }

    /// A new stream fed by both this stream and `other`.
    pub fn merge(&self, other: &Stream) -> Stream {
        let s = Stream::new(self.core().runtime());
        s.add_source(self);
        s.add_source(other);
        s
    }

    /// The running fold as a reactive value rather than a stream.
    pub fn reduce<F>(&self, init: Value, f: F) -> ReactiveVal
    where
        F: Fn(&Value, &Value) -> Value + 'static,
    {
        let rt = self.core().runtime().clone();
        let acc = self.accumulate(init.clone(), f);
        let val = ReactiveVal::new(&rt, init);
        val.add_source(&acc);
        val
    }

    /// A size-bounded buffered stream fed by this one.
    pub fn buffered(&self, size: usize) -> Result<SizeBufferedStream, Error> {
        SizeBufferedStream::from_source(self.core().runtime(), self, size)
    }

    /// A periodically flushed stream fed by this one.
    pub fn delayed(&self, delay_ms: u64) -> DelayedStream {
        DelayedStream::from_source(self.core().runtime(), self, delay_ms)
    }

    /// A throttled stream fed by this one (latest value per interval).
    pub fn throttled(&self, delay_ms: u64) -> ThrottlingStream {
        ThrottlingStream::from_source(self.core().runtime(), self, delay_ms)
    }

    /// A debounced stream fed by this one (quiet interval before delivery).
    pub fn debounced(&self, delay_ms: u64) -> DebouncingStream {
        DebouncingStream::from_source(self.core().runtime(), self, delay_ms)
    }
}

struct StreamBinding(Stream);

impl Invoke for StreamBinding {
    fn invoke(&self, event: &Event) -> Result<(), EvalError> {
        self.0
            .trigger_event(event.clone(), true)
            .map_err(EvalError::from)
    }
}

struct StreamErrBinding(Stream);

impl Invoke for StreamErrBinding {
    fn invoke(&self, event: &Event) -> Result<(), EvalError> {
        if let Some(e) = event.error_payload() {
            self.0.trigger_err(e.clone()).map_err(EvalError::from)?;
        }
        Ok(())
    }
}
