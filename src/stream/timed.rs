//! Rate-limited streams driven by the runtime clock.
//!
//! Three flow-control policies over a shared buffer shape:
//! - [`DelayedStream`] buffers everything and flushes on a fixed interval.
//! - [`ThrottlingStream`] keeps only the most recent event per interval.
//! - [`DebouncingStream`] restarts its timer on every trigger; delivery
//!   happens only after a full interval of quiet, and only the last event
//!   of the burst survives.
//!
//! Timers are interval registrations on the runtime's virtual clock; the
//! host drives them with `Runtime::advance`. Dropping a timed stream
//! cancels its timer.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::{Error, EvalError};
use crate::observe::{Event, Invoke, Listener, Observable, ObservableCore};
use crate::runtime::{Runtime, TimerId};
use crate::types::Value;

use super::buffered::EventBuffer;
use super::{stream_defer, Stream};

/// Shared state of the timed variants.
pub(crate) struct TimedInner {
    stream: Stream,
    buffer: EventBuffer,
    delay: Cell<u64>,
    timer: Cell<Option<TimerId>>,
    binding: RefCell<Option<Weak<dyn Invoke>>>,
}

impl TimedInner {
    fn new(rt: &Rc<Runtime>, delay: u64) -> TimedInner {
        TimedInner {
            stream: Stream::new(rt),
            buffer: EventBuffer::default(),
            delay: Cell::new(delay),
            timer: Cell::new(None),
            binding: RefCell::new(None),
        }
    }

    fn cancel(&self) {
        if let Some(id) = self.timer.take() {
            self.stream.core().runtime().clear_interval(id);
        }
    }
}

impl Drop for TimedInner {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn schedule(inner: &Rc<TimedInner>, delay: u64) {
    inner.cancel();
    inner.delay.set(delay);
    if delay == 0 {
        return;
    }
    let w = Rc::downgrade(inner);
    let rt = inner.stream.core().runtime();
    let id = rt.set_interval(
        delay,
        Rc::new(move || match w.upgrade() {
            Some(inner) => inner.buffer.flush_into(&inner.stream),
            None => Ok(()),
        }),
    );
    inner.timer.set(Some(id));
}

macro_rules! timed_stream {
    ($name:ident, $binding:ident) => {
        impl Observable for $name {
            fn core(&self) -> &ObservableCore {
                self.0.stream.core()
            }

            fn make_listener(&self) -> Option<Listener> {
                if let Some(b) = self.0.binding.borrow().as_ref().and_then(Weak::upgrade) {
                    return Some(b);
                }
                let b: Rc<dyn Invoke> = Rc::new($binding(self.clone()));
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

        impl $name {
            pub fn new(rt: &Rc<Runtime>, delay_ms: u64) -> $name {
                let s = $name(Rc::new(TimedInner::new(rt, delay_ms)));
                schedule(&s.0, delay_ms);
                s
            }

            pub fn from_source(
                rt: &Rc<Runtime>,
                source: &dyn Observable,
                delay_ms: u64,
            ) -> $name {
                let s = $name::new(rt, delay_ms);
                s.add_source(source);
                s
            }

            pub fn delay(&self) -> u64 {
                self.0.delay.get()
            }

            /// Cancel the current timer and restart it with a new interval.
            pub fn set_delay(&self, delay_ms: u64) {
                schedule(&self.0, delay_ms);
            }

            /// Stop periodic flushing; buffered events stay pending.
            pub fn cancel_delay(&self) {
                self.0.cancel();
            }

            pub fn trigger(&self, v: Value) -> Result<(), Error> {
                self.trigger_event(Event::value(v), true)
            }

            pub fn trigger_err(&self, e: EvalError) -> Result<(), Error> {
                self.0.stream.trigger_err(e)
            }

            /// Force pending buffered delivery now.
            pub fn flush(&self) -> Result<(), Error> {
                self.0.buffer.flush_into(&self.0.stream)
            }
        }

        struct $binding($name);

        impl Invoke for $binding {
            fn invoke(&self, event: &Event) -> Result<(), EvalError> {
                self.0
                    .trigger_event(event.clone(), true)
                    .map_err(EvalError::from)
            }
        }
    };
}

/// Buffers every event; a periodic timer flushes the batch.
#[derive(Clone)]
pub struct DelayedStream(Rc<TimedInner>);

timed_stream!(DelayedStream, DelayedBinding);

impl DelayedStream {
    pub fn trigger_event(&self, event: Event, transform: bool) -> Result<(), Error> {
        self.0.buffer.push(event, transform);
        Ok(())
    }
}

/// Keeps only the latest event per interval.
#[derive(Clone)]
pub struct ThrottlingStream(Rc<TimedInner>);

timed_stream!(ThrottlingStream, ThrottlingBinding);

impl ThrottlingStream {
    pub fn trigger_event(&self, event: Event, transform: bool) -> Result<(), Error> {
        self.0.buffer.replace(event, transform);
        Ok(())
    }
}

/// Delivers only after a full interval with no new events; each trigger
/// restarts the clock and displaces the buffered event.
#[derive(Clone)]
pub struct DebouncingStream(Rc<TimedInner>);

timed_stream!(DebouncingStream, DebouncingBinding);

impl DebouncingStream {
    pub fn trigger_event(&self, event: Event, transform: bool) -> Result<(), Error> {
        self.0.buffer.clear();
        let delay = self.0.delay.get();
        schedule(&self.0, delay);
        self.0.buffer.push(event, transform);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::listener;
    use std::cell::RefCell as StdRefCell;

    fn collect(s: &dyn Observable) -> Rc<StdRefCell<Vec<i64>>> {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let l = log.clone();
        s.core().on(listener(move |e| {
            if let Some(v) = e.payload().and_then(|v| v.as_int()) {
                l.borrow_mut().push(v);
            }
        }));
        log
    }

    #[test]
    fn test_delayed_flushes_on_each_interval() {
        let rt = Runtime::new();
        let s = DelayedStream::new(&rt, 10);
        let log = collect(&s);
        s.trigger(Value::Int(1)).unwrap();
        s.trigger(Value::Int(2)).unwrap();
        assert!(log.borrow().is_empty());
        rt.advance(10).unwrap();
        assert_eq!(*log.borrow(), vec![1, 2]);
        s.trigger(Value::Int(3)).unwrap();
        rt.advance(10).unwrap();
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_throttle_keeps_only_latest_per_interval() {
        let rt = Runtime::new();
        let s = ThrottlingStream::new(&rt, 10);
        let log = collect(&s);
        s.trigger(Value::Int(1)).unwrap();
        s.trigger(Value::Int(2)).unwrap();
        s.trigger(Value::Int(3)).unwrap();
        rt.advance(10).unwrap();
        assert_eq!(*log.borrow(), vec![3]);
    }

    #[test]
    fn test_debounce_delivers_last_of_burst_after_quiet() {
        let rt = Runtime::new();
        let s = DebouncingStream::new(&rt, 10);
        let log = collect(&s);

        s.trigger(Value::Int(1)).unwrap();
        rt.advance(5).unwrap();
        s.trigger(Value::Int(2)).unwrap();
        rt.advance(5).unwrap();
        // Only 5ms since the last trigger: nothing delivered yet.
        assert!(log.borrow().is_empty());
        rt.advance(5).unwrap();
        assert_eq!(*log.borrow(), vec![2]);
    }

    #[test]
    fn test_set_delay_reschedules() {
        let rt = Runtime::new();
        let s = DelayedStream::new(&rt, 10);
        let log = collect(&s);
        s.trigger(Value::Int(1)).unwrap();
        s.set_delay(50);
        rt.advance(10).unwrap();
        assert!(log.borrow().is_empty());
        rt.advance(40).unwrap();
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn test_drop_cancels_timer() {
        let rt = Runtime::new();
        let log;
        {
            let s = DelayedStream::new(&rt, 10);
            log = collect(&s);
            s.trigger(Value::Int(1)).unwrap();
        }
        rt.advance(100).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_timed_variant_fed_by_source_stream() {
        let rt = Runtime::new();
        let src = Stream::new(&rt);
        let throttled = src.throttled(10);
        let log = collect(&throttled);
        src.trigger(Value::Int(1)).unwrap();
        src.trigger(Value::Int(2)).unwrap();
        rt.advance(10).unwrap();
        assert_eq!(*log.borrow(), vec![2]);
    }
}
