//! Observable base protocol.
//!
//! Every node of the dependency graph - stream, property, tracked container -
//! embeds an [`ObservableCore`] and implements [`Observable`]. A node can be
//! observed (listeners, error listeners), can observe others (sources), runs
//! incoming values through its transform pipeline, and may have one `parent`
//! receiver that is always notified (field events bubbling to their owning
//! container).
//!
//! Notification is deferred: `update` builds one event and defers a delivery
//! per listener into the active flow run, de-duplicated by listener identity.
//! Writes outside a run transparently get a run of their own. When a
//! listener is the binding of another property, `will_update` cascades into
//! that property immediately, queueing the whole downstream closure of the
//! change up front - the priority bumps from de-duplication then order the
//! drain so each level settles before the next one reads it.

mod event;
mod listener;
mod transform;

pub use event::{Event, EventKind};
pub use listener::{
    listener, try_listener, ActionKey, Invoke, Listener, ListenerId, ListenerSet,
};
pub use transform::{apply_transforms, Transformed, TransformFn};

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, EvalError};
use crate::runtime::Runtime;
use crate::types::Value;

// =============================================================================
// Core state
// =============================================================================

struct SourceLink {
    // Weak: a node never owns its sources' lifetimes, only the capability
    // to detach from them while they live. Ownership runs the other way -
    // a source's listener list is what keeps derived nodes alive.
    core: WeakCore,
    listener: Option<ListenerId>,
    err_listener: Option<ListenerId>,
}

struct ObsInner {
    runtime: Rc<Runtime>,
    listeners: ListenerSet,
    err_listeners: ListenerSet,
    sources: RefCell<Vec<SourceLink>>,
    transforms: RefCell<Vec<TransformFn>>,
    parent: RefCell<Option<Listener>>,
}

/// Shared observable state. Cheap to clone; clones alias the same node.
#[derive(Clone)]
pub struct ObservableCore(Rc<ObsInner>);

/// Weak handle to an observable core.
#[derive(Clone)]
pub struct WeakCore(std::rc::Weak<ObsInner>);

impl WeakCore {
    pub fn upgrade(&self) -> Option<ObservableCore> {
        self.0.upgrade().map(ObservableCore)
    }
}

impl ObservableCore {
    pub fn new(runtime: &Rc<Runtime>) -> ObservableCore {
        ObservableCore(Rc::new(ObsInner {
            runtime: runtime.clone(),
            listeners: ListenerSet::new(),
            err_listeners: ListenerSet::new(),
            sources: RefCell::new(Vec::new()),
            transforms: RefCell::new(Vec::new()),
            parent: RefCell::new(None),
        }))
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.0.runtime
    }

    pub fn same(&self, other: &ObservableCore) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn on(&self, l: Listener) -> ListenerId {
        let id = ListenerId(self.0.runtime.next_id());
        self.0.listeners.add(id, l);
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.0.listeners.remove(id)
    }

    pub fn off_listener(&self, l: &Listener) -> bool {
        self.0.listeners.remove_listener(l)
    }

    pub fn on_err(&self, l: Listener) -> ListenerId {
        let id = ListenerId(self.0.runtime.next_id());
        self.0.err_listeners.add(id, l);
        id
    }

    pub fn off_err(&self, id: ListenerId) -> bool {
        self.0.err_listeners.remove(id)
    }

    pub fn has_listener(&self, l: &Listener) -> bool {
        self.0.listeners.contains(l)
    }

    pub fn listener_count(&self) -> usize {
        self.0.listeners.len()
    }

    pub(crate) fn listeners(&self) -> &ListenerSet {
        &self.0.listeners
    }

    pub(crate) fn listeners_snapshot(&self) -> Vec<(ListenerId, Listener)> {
        self.0.listeners.snapshot()
    }

    pub(crate) fn err_snapshot(&self) -> Vec<(ListenerId, Listener)> {
        self.0.err_listeners.snapshot()
    }

    /// No listeners, no error listeners, no parent - notifying would be
    /// pure overhead.
    pub fn is_silent(&self) -> bool {
        self.0.listeners.is_empty()
            && self.0.err_listeners.is_empty()
            && self.0.parent.borrow().is_none()
    }

    pub fn parent(&self) -> Option<Listener> {
        self.0.parent.borrow().clone()
    }

    pub fn set_parent(&self, parent: Option<Listener>) {
        *self.0.parent.borrow_mut() = parent;
    }

    pub fn push_transform(&self, t: TransformFn) {
        self.0.transforms.borrow_mut().push(t);
    }

    pub fn transforms_snapshot(&self) -> Vec<TransformFn> {
        self.0.transforms.borrow().clone()
    }

    pub fn downgrade(&self) -> WeakCore {
        WeakCore(Rc::downgrade(&self.0))
    }

    fn push_source(&self, link: SourceLink) {
        self.0.sources.borrow_mut().push(link);
    }

    fn remove_source(&self, source: &ObservableCore) {
        let mut sources = self.0.sources.borrow_mut();
        if let Some(i) = sources
            .iter()
            .position(|s| s.core.upgrade().is_some_and(|c| c.same(source)))
        {
            let link = sources.remove(i);
            drop(sources);
            if let Some(id) = link.listener {
                source.off(id);
            }
            if let Some(id) = link.err_listener {
                source.off_err(id);
            }
        }
    }
}

// =============================================================================
// Observable protocol
// =============================================================================

/// The observable protocol. Object-safe; generic combinators live on
/// [`ObservableExt`].
pub trait Observable {
    fn core(&self) -> &ObservableCore;

    /// The listener this node registers on its sources. `None` for nodes
    /// that never subscribe into anything.
    fn make_listener(&self) -> Option<Listener> {
        None
    }

    /// The error listener this node registers on its sources.
    fn make_err_listener(&self) -> Option<Listener> {
        None
    }

    /// Build the event describing the current notification.
    fn make_event(&self, source: Option<&Event>) -> Event {
        Event::value(Value::Null).caused_by(source)
    }

    /// Defer one delivery into the active flow. The default de-duplicates by
    /// listener identity; streams deliver every event to plain listeners and
    /// reserve de-duplication for property bindings.
    fn defer(&self, event: &Rc<Event>, l: &Listener) -> Result<(), Error> {
        self.core()
            .runtime()
            .flow()
            .push_once(None, ActionKey::of(l), l.clone(), event.clone())
    }

    /// Queue deliveries for every listener (and the parent), cascading into
    /// listener-owning properties so downstream levels are queued up front.
    fn will_update(&self, source: Option<&Event>) -> Result<(), Error> {
        let event = Rc::new(self.make_event(source));
        for (_, l) in self.core().listeners_snapshot() {
            self.defer(&event, &l)?;
            if let Some(p) = l.property() {
                p.will_update(Some(event.as_ref()))?;
            }
        }
        if let Some(parent) = self.core().parent() {
            self.defer(&event, &parent)?;
        }
        Ok(())
    }

    /// Notify listeners of a change. No-op without observers; outside a run
    /// a transparent run is opened so the write still propagates.
    fn update(&self, source: Option<&Event>) -> Result<(), Error> {
        if self.core().is_silent() {
            return Ok(());
        }
        let rt = self.core().runtime().clone();
        if rt.flow().is_running() {
            self.will_update(source)
        } else {
            rt.flow().run(|| self.will_update(source))
        }
    }

    /// Queue error-event deliveries for every error listener.
    fn will_update_err(&self, err: &EvalError) -> Result<(), Error> {
        let event = Rc::new(Event::error(err.clone()));
        for (_, l) in self.core().err_snapshot() {
            self.defer(&event, &l)?;
        }
        Ok(())
    }

    /// Notify error listeners of an evaluation failure.
    fn update_err(&self, err: &EvalError) -> Result<(), Error> {
        if self.core().err_snapshot().is_empty() {
            return Ok(());
        }
        let rt = self.core().runtime().clone();
        if rt.flow().is_running() {
            self.will_update_err(err)
        } else {
            rt.flow().run(|| self.will_update_err(err))
        }
    }

    /// Subscribe this node into `source`: the node's listener and error
    /// listener are registered there, and this node keeps the detach
    /// capability (not ownership of the source's lifetime).
    fn add_source(&self, source: &dyn Observable) {
        let listener = self.make_listener().map(|l| source.core().on(l));
        let err_listener = self.make_err_listener().map(|l| source.core().on_err(l));
        self.core().push_source(SourceLink {
            core: source.core().downgrade(),
            listener,
            err_listener,
        });
    }

    /// Detach this node's subscription from `source`.
    fn remove_source(&self, source: &dyn Observable) {
        self.core().remove_source(source.core());
    }
}

/// Registration and transform-pipeline combinators shared by every
/// observable.
pub trait ObservableExt: Observable {
    /// Register a listener; returns the detach handle.
    fn on(&self, l: Listener) -> ListenerId {
        self.core().on(l)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.core().off(id)
    }

    fn on_err(&self, l: Listener) -> ListenerId {
        self.core().on_err(l)
    }

    fn off_err(&self, id: ListenerId) -> bool {
        self.core().off_err(id)
    }

    /// Subscribe `dest` into this node (mirror of `add_source`).
    fn pipe_into(&self, dest: &dyn Observable)
    where
        Self: Sized,
    {
        dest.add_source(self);
    }

    /// Append a raw transform step.
    fn transform(&self, t: TransformFn) -> &Self {
        self.core().push_transform(t);
        self
    }

    /// Append a value-rewriting transform.
    fn mapping<F>(&self, f: F) -> &Self
    where
        F: Fn(&Value) -> Value + 'static,
    {
        self.transform(Rc::new(move |v: &Value| Ok(Transformed::Value(f(v)))))
    }

    /// Append a predicate transform; values failing it are suppressed.
    fn filtering<F>(&self, f: F) -> &Self
    where
        F: Fn(&Value) -> bool + 'static,
    {
        self.transform(Rc::new(move |v: &Value| {
            if f(v) {
                Ok(Transformed::Value(v.clone()))
            } else {
                Ok(Transformed::Suppressed)
            }
        }))
    }

    /// Append a folding transform: each incoming value is folded into an
    /// accumulator, and the accumulator is what propagates.
    fn accumulation<F>(&self, init: Value, f: F) -> &Self
    where
        F: Fn(&Value, &Value) -> Value + 'static,
    {
        let acc = RefCell::new(init);
        self.transform(Rc::new(move |v: &Value| {
            let next = f(&acc.borrow(), v);
            *acc.borrow_mut() = next.clone();
            Ok(Transformed::Value(next))
        }))
    }
}

impl<T: Observable + ?Sized> ObservableExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    /// Minimal observable node for protocol tests.
    struct Probe {
        core: ObservableCore,
        value: RefCell<Value>,
    }

    impl Probe {
        fn new(rt: &Rc<Runtime>) -> Rc<Probe> {
            Rc::new(Probe {
                core: ObservableCore::new(rt),
                value: RefCell::new(Value::Null),
            })
        }

        fn write(&self, v: Value) -> Result<(), Error> {
            *self.value.borrow_mut() = v;
            self.update(None)
        }
    }

    impl Observable for Probe {
        fn core(&self) -> &ObservableCore {
            &self.core
        }

        fn make_event(&self, source: Option<&Event>) -> Event {
            Event::value(self.value.borrow().clone()).caused_by(source)
        }
    }

    #[test]
    fn test_update_without_observers_opens_no_run() {
        let starts = Rc::new(StdRefCell::new(0));
        let s = starts.clone();
        let opts = crate::flow::FlowOptions {
            on_start: Some(Rc::new(move |_: &crate::flow::QueueGroup| {
                *s.borrow_mut() += 1;
            })),
            ..Default::default()
        };
        let rt = Runtime::with_options(&["main"], opts);
        let p = Probe::new(&rt);
        // Nobody listening: the write is a no-op, no run is opened.
        p.write(Value::Int(1)).unwrap();
        assert_eq!(*starts.borrow(), 0);

        p.on(listener(|_| {}));
        p.write(Value::Int(2)).unwrap();
        assert_eq!(*starts.borrow(), 1);
    }

    #[test]
    fn test_update_outside_run_opens_one() {
        let rt = Runtime::new();
        let p = Probe::new(&rt);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let l = log.clone();
        p.on(listener(move |e| {
            l.borrow_mut().push(e.payload().cloned());
        }));
        p.write(Value::Int(5)).unwrap();
        assert_eq!(*log.borrow(), vec![Some(Value::Int(5))]);
    }

    #[test]
    fn test_two_updates_in_one_run_collapse_per_listener() {
        let rt = Runtime::new();
        let p = Probe::new(&rt);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let l = log.clone();
        p.on(listener(move |e| {
            l.borrow_mut().push(e.payload().and_then(|v| v.as_int()));
        }));
        rt.run(|| {
            p.write(Value::Int(1))?;
            p.write(Value::Int(2))
        })
        .unwrap();
        // One delivery, carrying the event of the latest write.
        assert_eq!(*log.borrow(), vec![Some(2)]);
    }

    #[test]
    fn test_off_detaches() {
        let rt = Runtime::new();
        let p = Probe::new(&rt);
        let log = Rc::new(StdRefCell::new(0));
        let l = log.clone();
        let id = p.on(listener(move |_| *l.borrow_mut() += 1));
        p.write(Value::Int(1)).unwrap();
        assert!(p.off(id));
        p.write(Value::Int(2)).unwrap();
        assert_eq!(*log.borrow(), 1);
    }

    #[test]
    fn test_parent_is_always_notified() {
        let rt = Runtime::new();
        let p = Probe::new(&rt);
        let log = Rc::new(StdRefCell::new(0));
        let l = log.clone();
        p.core().set_parent(Some(listener(move |_| *l.borrow_mut() += 1)));
        p.write(Value::Int(1)).unwrap();
        assert_eq!(*log.borrow(), 1);
    }

    #[test]
    fn test_remove_source_detaches_both_listeners() {
        let rt = Runtime::new();
        let upstream = Probe::new(&rt);
        let downstream = Probe::new(&rt);

        // Give the downstream node a listener to register on sources.
        struct Listening {
            core: ObservableCore,
            binding: Listener,
        }
        impl Observable for Listening {
            fn core(&self) -> &ObservableCore {
                &self.core
            }
            fn make_listener(&self) -> Option<Listener> {
                Some(self.binding.clone())
            }
        }
        let hits = Rc::new(StdRefCell::new(0));
        let h = hits.clone();
        let node = Listening {
            core: downstream.core.clone(),
            binding: listener(move |_| *h.borrow_mut() += 1),
        };

        node.add_source(upstream.as_ref());
        upstream.write(Value::Int(1)).unwrap();
        assert_eq!(*hits.borrow(), 1);

        node.remove_source(upstream.as_ref());
        upstream.write(Value::Int(2)).unwrap();
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(upstream.core().listener_count(), 0);
    }
}
