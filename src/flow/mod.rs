//! Flow - the reentrant scheduler.
//!
//! A flow controls one active queue group at a time. `start` suspends the
//! active group (if any) on a stack and installs a fresh one; `stop` drains
//! the active group and restores the suspended one. `run` brackets a
//! callback between the two with guaranteed cleanup, so nested runs fully
//! flush before the outer run resumes - a listener that needs a settled
//! sub-computation (a computed field's first evaluation, say) just opens a
//! nested run.
//!
//! While paused, deferred actions are dropped, not buffered; resuming does
//! not replay anything. Deferring outside a run is a discipline error.

mod group;
mod queue;

pub use group::QueueGroup;
pub use queue::{Queue, QueueOptions};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{Error, EvalError};
use crate::observe::{ActionKey, Event, Listener};

/// Flow-level hooks and the options handed to every queue of every run.
#[derive(Clone, Default)]
pub struct FlowOptions {
    /// Called with each freshly installed group.
    pub on_start: Option<Rc<dyn Fn(&QueueGroup)>>,
    /// Called with each drained group after it is uninstalled.
    pub on_stop: Option<Rc<dyn Fn(&QueueGroup)>>,
    /// Routes evaluation errors escaping a `run` callback.
    pub err: Option<Rc<dyn Fn(&EvalError)>>,
    /// Options for the queues of every group this flow creates.
    pub queue: QueueOptions,
}

/// The scheduler. One active queue group, a suspension stack for nested
/// runs, and a pause gate.
pub struct Flow {
    names: Vec<Rc<str>>,
    opts: FlowOptions,
    instance: RefCell<Option<Rc<QueueGroup>>>,
    suspended: RefCell<Vec<Rc<QueueGroup>>>,
    paused: Cell<bool>,
}

impl Flow {
    /// A flow whose runs drain the given queues in order.
    pub fn new(names: &[&str], opts: FlowOptions) -> Flow {
        let names = if names.is_empty() { &["main"][..] } else { names };
        Flow {
            names: names.iter().map(|n| Rc::from(*n)).collect(),
            opts,
            instance: RefCell::new(None),
            suspended: RefCell::new(Vec::new()),
            paused: Cell::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.instance.borrow().is_some()
    }

    /// Gate deferrals: while paused, pushes are silently dropped.
    pub fn pause(&self) {
        self.paused.set(true);
    }

    pub fn resume(&self) {
        self.paused.set(false);
    }

    pub fn is_paused(&self) -> bool {
        self.is_running() && self.paused.get()
    }

    /// Install a fresh group, suspending the active one.
    pub fn start(&self) {
        let mut instance = self.instance.borrow_mut();
        if let Some(active) = instance.take() {
            self.suspended.borrow_mut().push(active);
        }
        let group = Rc::new(QueueGroup::new(&self.names, &self.opts.queue));
        if let Some(on_start) = &self.opts.on_start {
            on_start(&group);
        }
        tracing::trace!(target: "spark_flow::flow", nested = self.suspended.borrow().len(), "flow start");
        *instance = Some(group);
    }

    /// Drain the active group, then restore the previously suspended one.
    ///
    /// The group stays installed while draining so listeners can keep
    /// deferring into it; it is uninstalled on every exit path, including
    /// an error escaping the drain.
    pub fn stop(&self) -> Result<(), Error> {
        let Some(group) = self.instance.borrow().clone() else {
            return Ok(());
        };
        let result = group.drain(None);

        let previous = self.suspended.borrow_mut().pop();
        *self.instance.borrow_mut() = previous;
        if let Some(on_stop) = &self.opts.on_stop {
            on_stop(&group);
        }
        tracing::trace!(target: "spark_flow::flow", "flow stop");
        result.map_err(Error::Eval)
    }

    /// Bracket `callback` in a run: start, invoke, stop - with the stop
    /// guaranteed on every exit path. An evaluation error returned by the
    /// callback goes to the `err` option when one is configured; the
    /// deferred actions still drain.
    pub fn run<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), Error>,
    {
        self.start();
        let cb_result = match callback() {
            Err(Error::Eval(e)) if self.opts.err.is_some() => {
                if let Some(err) = &self.opts.err {
                    err(&e);
                }
                Ok(())
            }
            other => other,
        };
        let stop_result = self.stop();
        cb_result.and(stop_result)
    }

    /// Defer into the active run. Fails outside a run; dropped while paused.
    pub fn push(
        &self,
        queue: Option<&str>,
        key: ActionKey,
        listener: Listener,
        event: Rc<Event>,
    ) -> Result<(), Error> {
        let instance = self.instance.borrow();
        let Some(group) = instance.as_ref() else {
            return Err(Error::NotRunning);
        };
        if !self.paused.get() {
            group.push(queue, key, listener, event);
        }
        Ok(())
    }

    /// Defer into the active run with de-duplication. Fails outside a run;
    /// dropped while paused.
    pub fn push_once(
        &self,
        queue: Option<&str>,
        key: ActionKey,
        listener: Listener,
        event: Rc<Event>,
    ) -> Result<(), Error> {
        let instance = self.instance.borrow();
        let Some(group) = instance.as_ref() else {
            return Err(Error::NotRunning);
        };
        if !self.paused.get() {
            group.push_once(queue, key, listener, event);
        }
        Ok(())
    }
}
