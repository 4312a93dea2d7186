//! Action queue - an ordered, priority-bucketed list of deferred deliveries.
//!
//! Entries are `(key, listener, event, priority)`. `push` always appends at
//! priority 1; `push_once` de-duplicates by key: a re-push replaces the event
//! and bumps the priority, moving the delivery later. Draining runs priority
//! passes over the entries in insertion order, so a listener notified twice
//! in one round runs once, after every once-notified listener, with the
//! latest event. That collapse is what defeats diamond-shaped
//! re-notification without a second scheduling mechanism.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::EvalError;
use crate::observe::{ActionKey, Event, Listener};

/// Per-queue hooks.
///
/// `before`/`after` fire once around a top-level drain when the queue had
/// work. `err` catches evaluation failures per entry; without it an error
/// aborts the drain and surfaces to the caller.
#[derive(Clone, Default)]
pub struct QueueOptions {
    pub before: Option<Rc<dyn Fn(&Queue)>>,
    pub after: Option<Rc<dyn Fn(&Queue)>>,
    pub err: Option<Rc<dyn Fn(&EvalError)>>,
}

struct Entry {
    key: ActionKey,
    listener: Listener,
    event: Rc<Event>,
    priority: u32,
}

/// A named queue of deferred deliveries.
pub struct Queue {
    name: Rc<str>,
    entries: RefCell<Vec<Entry>>,
    opts: QueueOptions,
}

impl Queue {
    pub fn new(name: &str, opts: QueueOptions) -> Queue {
        Queue {
            name: Rc::from(name),
            entries: RefCell::new(Vec::new()),
            opts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Append a delivery unconditionally, at priority 1.
    pub fn push(&self, key: ActionKey, listener: Listener, event: Rc<Event>) {
        self.entries.borrow_mut().push(Entry {
            key,
            listener,
            event,
            priority: 1,
        });
    }

    /// Append a delivery, or - when the key is already queued - replace its
    /// event and bump its priority so it runs after the single-notification
    /// entries of the current pass.
    pub fn push_once(&self, key: ActionKey, listener: Listener, event: Rc<Event>) {
        {
            let mut entries = self.entries.borrow_mut();
            if let Some(e) = entries.iter_mut().find(|e| e.key == key) {
                e.event = event;
                e.priority += 1;
                return;
            }
        }
        self.push(key, listener, event);
    }

    /// Drain the queue.
    ///
    /// Runs priority passes over the current entries; entries appended by
    /// running listeners form a new round, drained recursively unless `once`
    /// is set. Errors follow the `err` option: routed and survivable, or
    /// propagated, aborting the drain with the remaining entries intact
    /// (the owning flow discards them with the run).
    pub fn drain(&self, once: bool) -> Result<(), EvalError> {
        let had_work = !self.is_empty();
        if had_work
            && let Some(before) = &self.opts.before
        {
            before(self);
        }
        let result = self.drain_rounds(once);
        if had_work
            && let Some(after) = &self.opts.after
        {
            after(self);
        }
        result
    }

    fn drain_rounds(&self, once: bool) -> Result<(), EvalError> {
        let mut round = 0usize;
        loop {
            let limit = self.entries.borrow().len();
            if limit == 0 {
                return Ok(());
            }
            round += 1;
            tracing::trace!(target: "spark_flow::queue", queue = %self.name, round, entries = limit, "drain round");
            self.run_passes(limit)?;

            let mut entries = self.entries.borrow_mut();
            if entries.len() > limit {
                // Listeners deferred new work; it forms the next round.
                entries.drain(..limit);
                if once {
                    return Ok(());
                }
            } else {
                entries.clear();
                return Ok(());
            }
        }
    }

    /// One round: repeated passes over `[0, limit)` by ascending priority.
    /// A higher-priority entry seen mid-pass extends the next pass's scan
    /// boundary so it gets revisited once its priority comes up.
    fn run_passes(&self, limit: usize) -> Result<(), EvalError> {
        let mut going = true;
        let mut priority = 1u32;
        let mut boundary = limit;
        while going {
            going = false;
            let scan = boundary;
            for i in 0..scan {
                // Re-borrow per entry: running a listener may append or bump
                // priorities in this same queue.
                let (prio, listener, event) = {
                    let entries = self.entries.borrow();
                    let e = &entries[i];
                    (e.priority, e.listener.clone(), e.event.clone())
                };
                if prio == priority {
                    self.run_entry(&listener, &event)?;
                } else if prio > priority {
                    going = true;
                    boundary = i + 1;
                }
            }
            priority += 1;
        }
        Ok(())
    }

    fn run_entry(&self, listener: &Listener, event: &Event) -> Result<(), EvalError> {
        match listener.invoke(event) {
            Ok(()) => Ok(()),
            Err(e) => match &self.opts.err {
                Some(handler) => {
                    tracing::debug!(target: "spark_flow::queue", queue = %self.name, error = %e, "evaluation error routed");
                    handler(&e);
                    Ok(())
                }
                None => Err(e),
            },
        }
    }
}
