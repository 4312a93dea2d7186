//! Runtime - explicit scheduler lifecycle for one dataflow graph.
//!
//! A [`Runtime`] owns the [`Flow`], the evaluation-context stack used by
//! dependency auto-tracking, and a virtual clock with an interval-timer
//! registry that drives the rate-limited streams. Create one at process
//! start (or one per test), pass it to every node you construct, and the
//! graph it anchors is fully isolated from any other.
//!
//! The default runtime routes evaluation errors to the error stream when one
//! is alive, otherwise logs them. The error stream is held weakly - keep the
//! handle returned by [`Runtime::err_stream`] alive to receive errors.
//!
//! # Virtual clock
//!
//! The runtime is single-threaded and cooperative; nothing blocks. Timed
//! streams register interval timers against the runtime clock, and the host
//! drives time explicitly:
//!
//! ```ignore
//! use spark_flow::{Runtime, Stream, Value};
//!
//! let rt = Runtime::new();
//! let s = Stream::new(&rt);
//! let debounced = s.debounced(100);
//! s.trigger(Value::Int(1)).unwrap();
//! rt.advance(100).unwrap(); // fires the pending flush
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{Error, EvalError};
use crate::flow::{Flow, FlowOptions, QueueOptions};
use crate::observe::{Listener, Observable};
use crate::stream::{Stream, WeakStream};

// =============================================================================
// Evaluation context
// =============================================================================

/// The scoped "current evaluator" stack.
///
/// While a computed field evaluates, its binding sits on top of this stack;
/// tracked reads register the top as a listener. Entries are pushed through
/// [`EvalScope`] guards so the stack unwinds correctly on every exit path,
/// including error returns - evaluations nest.
#[derive(Default)]
pub(crate) struct EvalStack {
    stack: RefCell<Vec<Listener>>,
}

impl EvalStack {
    fn current(&self) -> Option<Listener> {
        self.stack.borrow().last().cloned()
    }

    fn push(&self, l: Listener) {
        self.stack.borrow_mut().push(l);
    }

    fn pop(&self) {
        self.stack.borrow_mut().pop();
    }
}

/// Drop guard holding one evaluation-context frame.
pub(crate) struct EvalScope<'a> {
    stack: &'a EvalStack,
}

impl Drop for EvalScope<'_> {
    fn drop(&mut self) {
        self.stack.pop();
    }
}

// =============================================================================
// Timers
// =============================================================================

/// Handle to a registered interval timer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimerId(u64);

struct Timer {
    id: TimerId,
    due: u64,
    period: u64,
    task: Rc<dyn Fn() -> Result<(), Error>>,
}

#[derive(Default)]
struct Timers {
    now: Cell<u64>,
    entries: RefCell<Vec<Timer>>,
}

// =============================================================================
// Runtime
// =============================================================================

/// Anchor of one dataflow graph: flow, evaluation context, clock.
pub struct Runtime {
    flow: Flow,
    eval: EvalStack,
    timers: Timers,
    ids: Cell<u64>,
    err_stream: RefCell<WeakStream>,
}

impl Runtime {
    /// A runtime with the default single queue (`"main"`).
    pub fn new() -> Rc<Runtime> {
        Self::with_queues(&["main"])
    }

    /// A runtime whose flow drains the given queues in order. Layer queues
    /// so low-level work settles before high-level observers (a trailing
    /// `"render"` queue, say).
    pub fn with_queues(names: &[&str]) -> Rc<Runtime> {
        Rc::new_cyclic(|weak: &std::rc::Weak<Runtime>| {
            let w1 = weak.clone();
            let flow_err: Rc<dyn Fn(&EvalError)> = Rc::new(move |e| {
                if let Some(rt) = w1.upgrade() {
                    rt.route_error(e);
                }
            });
            let opts = FlowOptions {
                err: Some(flow_err.clone()),
                queue: QueueOptions {
                    err: Some(flow_err),
                    ..Default::default()
                },
                ..Default::default()
            };
            Runtime {
                flow: Flow::new(names, opts),
                eval: EvalStack::default(),
                timers: Timers::default(),
                ids: Cell::new(0),
                err_stream: RefCell::new(WeakStream::new()),
            }
        })
    }

    /// A runtime with caller-supplied flow options. Without an `err` option
    /// evaluation errors surface from `run`/`stop` instead of being routed.
    pub fn with_options(names: &[&str], opts: FlowOptions) -> Rc<Runtime> {
        Rc::new(Runtime {
            flow: Flow::new(names, opts),
            eval: EvalStack::default(),
            timers: Timers::default(),
            ids: Cell::new(0),
            err_stream: RefCell::new(WeakStream::new()),
        })
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Convenience for `flow().run` - batch several writes into one
    /// propagation pass.
    pub fn run<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), Error>,
    {
        self.flow.run(callback)
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.ids.get();
        self.ids.set(id + 1);
        id
    }

    // -------------------------------------------------------------------------
    // Evaluation context
    // -------------------------------------------------------------------------

    pub(crate) fn current_evaluator(&self) -> Option<Listener> {
        self.eval.current()
    }

    pub(crate) fn enter_eval(&self, evaluator: Listener) -> EvalScope<'_> {
        self.eval.push(evaluator);
        EvalScope { stack: &self.eval }
    }

    // -------------------------------------------------------------------------
    // Error routing
    // -------------------------------------------------------------------------

    /// The error stream: evaluation errors become ordinary observable events
    /// of error kind. Created lazily and held weakly - keep the returned
    /// handle alive for as long as you want errors delivered there.
    pub fn err_stream(self: &Rc<Self>) -> Stream {
        if let Some(s) = self.err_stream.borrow().upgrade() {
            return s;
        }
        let s = Stream::new(self);
        *self.err_stream.borrow_mut() = s.downgrade();
        s
    }

    pub(crate) fn route_error(&self, e: &EvalError) {
        let sink = self.err_stream.borrow().upgrade();
        if let Some(s) = sink
            && !s.core().err_snapshot().is_empty()
            && s.trigger_err(e.clone()).is_ok()
        {
            return;
        }
        tracing::error!(target: "spark_flow", error = %e, "unhandled evaluation error");
    }

    // -------------------------------------------------------------------------
    // Virtual clock
    // -------------------------------------------------------------------------

    /// Current clock reading, in milliseconds.
    pub fn now(&self) -> u64 {
        self.timers.now.get()
    }

    /// Register a periodic timer first firing `period` ms from now.
    pub(crate) fn set_interval(
        &self,
        period: u64,
        task: Rc<dyn Fn() -> Result<(), Error>>,
    ) -> TimerId {
        let id = TimerId(self.next_id());
        self.timers.entries.borrow_mut().push(Timer {
            id,
            due: self.timers.now.get() + period,
            period,
            task,
        });
        id
    }

    pub(crate) fn clear_interval(&self, id: TimerId) {
        self.timers
            .entries
            .borrow_mut()
            .retain(|t| t.id != id);
    }

    /// Advance the clock by `ms`, firing due timers in due order. A timer's
    /// task may cancel or reschedule timers (debounce does); the registry is
    /// re-examined after every firing.
    pub fn advance(&self, ms: u64) -> Result<(), Error> {
        let target = self.timers.now.get() + ms;
        loop {
            let next = {
                let mut entries = self.timers.entries.borrow_mut();
                match entries
                    .iter_mut()
                    .filter(|t| t.due <= target)
                    .min_by_key(|t| t.due)
                {
                    Some(t) => {
                        let fired_at = t.due;
                        t.due += t.period;
                        Some((fired_at, t.id, t.task.clone()))
                    }
                    None => None,
                }
            };
            match next {
                Some((at, id, task)) => {
                    self.timers.now.set(at);
                    tracing::trace!(target: "spark_flow::timer", timer = ?id, at, "interval fired");
                    task()?;
                }
                None => break,
            }
        }
        self.timers.now.set(target);
        Ok(())
    }
}
