//! Size-bounded buffering.
//!
//! A [`SizeBufferedStream`] holds incoming events until the buffer reaches
//! its configured size, then flushes them all through the normal trigger
//! path inside one flow run - delivery stays in source order, batched into
//! a single propagation pass.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::{Error, EvalError};
use crate::observe::{Event, Invoke, Listener, Observable, ObservableCore};
use crate::runtime::Runtime;
use crate::types::Value;

use super::{stream_defer, Stream};

/// Pending `(event, apply_transforms)` pairs shared by the buffered family.
#[derive(Default)]
pub(crate) struct EventBuffer {
    events: RefCell<Vec<(Event, bool)>>,
}

impl EventBuffer {
    pub(crate) fn push(&self, event: Event, transform: bool) {
        self.events.borrow_mut().push((event, transform));
    }

    /// Drop everything buffered and keep only this event.
    pub(crate) fn replace(&self, event: Event, transform: bool) {
        let mut events = self.events.borrow_mut();
        events.clear();
        events.push((event, transform));
    }

    pub(crate) fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.events.borrow().len()
    }

    /// Drain the buffer through the stream's trigger path, inside one run.
    pub(crate) fn flush_into(&self, stream: &Stream) -> Result<(), Error> {
        if self.events.borrow().is_empty() {
            return Ok(());
        }
        let drained: Vec<(Event, bool)> = self.events.borrow_mut().drain(..).collect();
        tracing::trace!(target: "spark_flow::stream", batch = drained.len(), "buffered flush");
        let rt = stream.core().runtime().clone();
        rt.flow().run(|| {
            for (event, transform) in drained {
                stream.trigger_event(event, transform)?;
            }
            Ok(())
        })
    }
}

pub(crate) struct SizeBufferedInner {
    stream: Stream,
    buffer: EventBuffer,
    size: usize,
    binding: RefCell<Option<Weak<dyn Invoke>>>,
}

/// A stream that delivers in batches of exactly `size` events.
#[derive(Clone)]
pub struct SizeBufferedStream(Rc<SizeBufferedInner>);

impl Observable for SizeBufferedStream {
    fn core(&self) -> &ObservableCore {
        self.0.stream.core()
    }

    fn make_listener(&self) -> Option<Listener> {
        if let Some(b) = self.0.binding.borrow().as_ref().and_then(Weak::upgrade) {
            return Some(b);
        }
        let b: Rc<dyn Invoke> = Rc::new(SizeBufferedBinding(self.clone()));
        *self.0.binding.borrow_mut() = Some(Rc::downgrade(&b));
        Some(b)
    }

    fn make_err_listener(&self) -> Option<Listener> {
        self.0.stream.make_err_listener()
    }

    fn make_event(&self, source: Option<&Event>) -> Event {
        self.0.stream.make_event(source)
    }

    fn defer(&self, event: &Rc<Event>, l: &Listener) -> Result<(), Error> {
        stream_defer(self.core(), event, l)
    }
}

impl SizeBufferedStream {
    /// A buffered stream flushing every `size` events. Size zero is a
    /// construction error, returned synchronously.
    pub fn new(rt: &Rc<Runtime>, size: usize) -> Result<SizeBufferedStream, Error> {
        if size == 0 {
            return Err(Error::InvalidBufferSize);
        }
        Ok(SizeBufferedStream(Rc::new(SizeBufferedInner {
            stream: Stream::new(rt),
            buffer: EventBuffer::default(),
            size,
            binding: RefCell::new(None),
        })))
    }

    pub fn from_source(
        rt: &Rc<Runtime>,
        source: &dyn Observable,
        size: usize,
    ) -> Result<SizeBufferedStream, Error> {
        let s = SizeBufferedStream::new(rt, size)?;
        s.add_source(source);
        Ok(s)
    }

    pub fn size(&self) -> usize {
        self.0.size
    }

    /// Buffer a value; the batch flushes when the buffer reaches size.
    pub fn trigger(&self, v: Value) -> Result<(), Error> {
        self.trigger_event(Event::value(v), true)
    }

    pub fn trigger_event(&self, event: Event, transform: bool) -> Result<(), Error> {
        self.0.buffer.push(event, transform);
        if self.0.buffer.len() == self.0.size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn trigger_err(&self, e: EvalError) -> Result<(), Error> {
        self.0.stream.trigger_err(e)
    }

    /// Force pending delivery regardless of fill level.
    pub fn flush(&self) -> Result<(), Error> {
        self.0.buffer.flush_into(&self.0.stream)
    }
}

struct SizeBufferedBinding(SizeBufferedStream);

impl Invoke for SizeBufferedBinding {
    fn invoke(&self, event: &Event) -> Result<(), EvalError> {
        self.0
            .trigger_event(event.clone(), true)
            .map_err(EvalError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{listener, ObservableExt};
    use std::cell::RefCell as StdRefCell;

    fn collect(s: &SizeBufferedStream) -> Rc<StdRefCell<Vec<i64>>> {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let l = log.clone();
        s.on(listener(move |e| {
            if let Some(v) = e.payload().and_then(|v| v.as_int()) {
                l.borrow_mut().push(v);
            }
        }));
        log
    }

    #[test]
    fn test_zero_size_is_refused() {
        let rt = Runtime::new();
        assert!(matches!(
            SizeBufferedStream::new(&rt, 0),
            Err(Error::InvalidBufferSize)
        ));
    }

    #[test]
    fn test_flushes_after_exactly_size_triggers_in_order() {
        let rt = Runtime::new();
        let s = SizeBufferedStream::new(&rt, 2).unwrap();
        let log = collect(&s);

        s.trigger(Value::Int(1)).unwrap();
        assert!(log.borrow().is_empty());
        s.trigger(Value::Int(2)).unwrap();
        assert_eq!(*log.borrow(), vec![1, 2]);

        s.trigger(Value::Int(3)).unwrap();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_manual_flush_delivers_partial_batch() {
        let rt = Runtime::new();
        let s = SizeBufferedStream::new(&rt, 3).unwrap();
        let log = collect(&s);
        s.trigger(Value::Int(1)).unwrap();
        s.flush().unwrap();
        assert_eq!(*log.borrow(), vec![1]);
        // Flushing an empty buffer is a no-op.
        s.flush().unwrap();
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn test_buffered_from_upstream_source() {
        let rt = Runtime::new();
        let src = Stream::new(&rt);
        let buffered = src.buffered(2).unwrap();
        let log = collect(&buffered);
        src.trigger(Value::Int(1)).unwrap();
        src.trigger(Value::Int(2)).unwrap();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }
}
