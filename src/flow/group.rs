//! Queue group - an ordered sequence of named queues drained with
//! back-propagation.
//!
//! Queues are layered: earlier queues are lower level. Draining walks the
//! queues in declared order, but when a listener in a later queue defers
//! work into an earlier one, the walk jumps back to the earliest refilled
//! queue so low-level state settles before high-level observers run again.

use std::rc::Rc;

use crate::error::EvalError;
use crate::observe::{ActionKey, Event, Listener};

use super::queue::{Queue, QueueOptions};

/// An ordered set of named queues. The name → queue mapping is fixed at
/// construction.
pub struct QueueGroup {
    queues: Vec<Queue>,
}

impl QueueGroup {
    pub fn new(names: &[Rc<str>], opts: &QueueOptions) -> QueueGroup {
        QueueGroup {
            queues: names.iter().map(|n| Queue::new(n, opts.clone())).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.queues.iter().position(|q| q.name() == name)
    }

    fn target(&self, name: Option<&str>) -> Option<&Queue> {
        match name {
            Some(n) => {
                let found = self.index_of(n).map(|i| &self.queues[i]);
                if found.is_none() {
                    tracing::warn!(target: "spark_flow::flow", queue = n, "push into unknown queue dropped");
                }
                found
            }
            None => self.queues.first(),
        }
    }

    /// Defer into the named queue (default: the first).
    pub fn push(&self, name: Option<&str>, key: ActionKey, listener: Listener, event: Rc<Event>) {
        if let Some(q) = self.target(name) {
            q.push(key, listener, event);
        }
    }

    /// Defer into the named queue with de-duplication (default: the first).
    pub fn push_once(
        &self,
        name: Option<&str>,
        key: ActionKey,
        listener: Listener,
        event: Rc<Event>,
    ) {
        if let Some(q) = self.target(name) {
            q.push_once(key, listener, event);
        }
    }

    /// Drain all queues from `start` (default: the first) forward.
    ///
    /// After draining queue `i`, control jumps back to the earliest queue at
    /// or before `i` that became non-empty. Termination: each queue's own
    /// drain terminates by priority bumping, and a back-jump requires an
    /// empty queue to have been refilled by freshly deferred work, which the
    /// single drain of that queue then consumes.
    pub fn drain(&self, start: Option<&str>) -> Result<(), EvalError> {
        let mut i = match start {
            Some(name) => self.index_of(name).unwrap_or(0),
            None => 0,
        };
        while i < self.queues.len() {
            self.queues[i].drain(true)?;
            match self.earliest_nonempty(i) {
                Some(back) => i = back,
                None => i += 1,
            }
        }
        Ok(())
    }

    fn earliest_nonempty(&self, upto: usize) -> Option<usize> {
        self.queues[..=upto].iter().position(|q| !q.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::listener;
    use crate::types::Value;
    use std::cell::RefCell;

    fn ev(n: i64) -> Rc<Event> {
        Rc::new(Event::value(Value::Int(n)))
    }

    fn group(names: &[&str]) -> Rc<QueueGroup> {
        let names: Vec<Rc<str>> = names.iter().map(|n| Rc::from(*n)).collect();
        Rc::new(QueueGroup::new(&names, &QueueOptions::default()))
    }

    #[test]
    fn test_queues_drain_in_declared_order() {
        let g = group(&["low", "high"]);
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = log.clone();
        let l2 = log.clone();
        let a = listener(move |_| l1.borrow_mut().push("high"));
        let b = listener(move |_| l2.borrow_mut().push("low"));
        g.push(Some("high"), ActionKey::of(&a), a.clone(), ev(0));
        g.push(Some("low"), ActionKey::of(&b), b.clone(), ev(0));
        g.drain(None).unwrap();
        assert_eq!(*log.borrow(), vec!["low", "high"]);
    }

    #[test]
    fn test_back_jump_when_later_queue_refills_earlier_one() {
        let g = group(&["low", "high"]);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l1 = log.clone();
        let low_action = listener(move |_| l1.borrow_mut().push("low"));

        let g2 = g.clone();
        let l2 = log.clone();
        let low2 = low_action.clone();
        let high_action = listener(move |_| {
            l2.borrow_mut().push("high");
            g2.push(Some("low"), ActionKey::of(&low2), low2.clone(), ev(1));
        });

        g.push(Some("high"), ActionKey::of(&high_action), high_action.clone(), ev(0));
        g.drain(None).unwrap();
        // The refill of "low" runs before the walk moves past "high".
        assert_eq!(*log.borrow(), vec!["high", "low"]);
    }

    #[test]
    fn test_drain_from_named_queue_still_revisits_nonempty_lower() {
        let g = group(&["low", "high"]);
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = log.clone();
        let l2 = log.clone();
        let a = listener(move |_| l1.borrow_mut().push("low"));
        let b = listener(move |_| l2.borrow_mut().push("high"));
        g.push(Some("low"), ActionKey::of(&a), a.clone(), ev(0));
        g.push(Some("high"), ActionKey::of(&b), b.clone(), ev(0));
        // Starting at "high" drains it first, but the walk back-jumps to
        // the still-pending lower queue before finishing.
        g.drain(Some("high")).unwrap();
        assert_eq!(*log.borrow(), vec!["high", "low"]);
        assert!(g.is_empty());
    }

    #[test]
    fn test_unknown_queue_push_is_dropped() {
        let g = group(&["only"]);
        let a = listener(|_| {});
        g.push(Some("missing"), ActionKey::of(&a), a.clone(), ev(0));
        assert!(g.is_empty());
    }
}
