//! Reactive sequences.
//!
//! A [`ReactiveVec`] wraps an ordered collection of values behind tracked
//! reads and structural operations. Reads register the current evaluator on
//! one of two listener channels - `INDEX` for slot-level interest, `LENGTH`
//! for size-level interest - and every structural operation computes its new
//! state eagerly, then emits exactly one event describing the change,
//! routed to the channel(s) the operation concerns.
//!
//! Derived views (map/filter/slice/concat and the live scalar queries) are
//! built in `derived`; the positional diff that backs full re-derivation is
//! in `diff`.

mod derived;
mod diff;

pub use diff::{apply, diff, DiffRun};

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::error::Error;
use crate::observe::{ActionKey, Event, Listener, ListenerId, ListenerSet, Observable};
use crate::runtime::Runtime;
use crate::types::Value;

bitflags! {
    /// Listener channels of a reactive sequence.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Channels: u8 {
        /// Slot-level changes: `set`, `reverse`, `sort`.
        const INDEX = 1;
        /// Size-level changes: `add`, `remove`, `set_len`.
        const LENGTH = 2;
        /// Both channels.
        const CHANGE = Self::INDEX.bits() | Self::LENGTH.bits();
    }
}

/// A sharable comparator, carried inside `Sort` events so subset views can
/// re-sort with the same ordering.
#[derive(Clone)]
pub struct SortCmp(pub Rc<dyn Fn(&Value, &Value) -> Ordering>);

impl SortCmp {
    pub fn new<F>(f: F) -> SortCmp
    where
        F: Fn(&Value, &Value) -> Ordering + 'static,
    {
        SortCmp(Rc::new(f))
    }
}

impl std::fmt::Debug for SortCmp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SortCmp(..)")
    }
}

/// The operation tag and payload of one structural change.
#[derive(Clone, Debug)]
pub enum VecChange {
    /// One slot replaced in place.
    Set { index: usize, old: Value, new: Value },
    /// Values added at the front (`index == 0`) or appended (`index` is the
    /// last inserted position).
    Add { index: usize, values: Vec<Value> },
    /// One value removed at the front (`index == 0`) or back.
    Remove { index: usize, value: Value },
    /// Length forced; truncates or extends with `Null`.
    SetLength { old: usize, new: usize },
    /// In-place reversal.
    Reverse,
    /// In-place sort with the given comparator.
    Sort { cmp: SortCmp },
    /// Arbitrary replace: `removed` taken out at `index`, `inserted` put in.
    Splice {
        index: usize,
        removed: Vec<Value>,
        inserted: Vec<Value>,
    },
}

impl VecChange {
    /// Slot-level operations go to the `INDEX` channel; everything else is
    /// size-level (`splice` routes by whether its range changed size).
    pub fn is_index_op(&self) -> bool {
        matches!(
            self,
            VecChange::Set { .. } | VecChange::Reverse | VecChange::Sort { .. }
        )
    }
}

pub(crate) struct VecInner {
    runtime: Rc<Runtime>,
    items: RefCell<Vec<Value>>,
    index_listeners: ListenerSet,
    length_listeners: ListenerSet,
    last_index_caller: RefCell<Option<ActionKey>>,
    last_length_caller: RefCell<Option<ActionKey>>,
}

/// Handle to a reactive sequence. Clones alias the same sequence.
#[derive(Clone)]
pub struct ReactiveVec(pub(crate) Rc<VecInner>);

/// Weak sequence handle, used by derived-view updaters so a view never owns
/// its source.
#[derive(Clone)]
pub(crate) struct WeakVec(Weak<VecInner>);

impl WeakVec {
    pub(crate) fn upgrade(&self) -> Option<ReactiveVec> {
        self.0.upgrade().map(ReactiveVec)
    }
}

impl std::fmt::Debug for ReactiveVec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveVec")
            .field("len", &self.0.items.borrow().len())
            .finish()
    }
}

impl ReactiveVec {
    pub fn new(rt: &Rc<Runtime>) -> ReactiveVec {
        Self::from_values(rt, Vec::new())
    }

    pub fn from_values(rt: &Rc<Runtime>, items: Vec<Value>) -> ReactiveVec {
        ReactiveVec(Rc::new(VecInner {
            runtime: rt.clone(),
            items: RefCell::new(items),
            index_listeners: ListenerSet::new(),
            length_listeners: ListenerSet::new(),
            last_index_caller: RefCell::new(None),
            last_length_caller: RefCell::new(None),
        }))
    }

    /// Whether two handles alias the same sequence.
    pub fn same(&self, other: &ReactiveVec) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn runtime(&self) -> &Rc<Runtime> {
        &self.0.runtime
    }

    pub(crate) fn downgrade(&self) -> WeakVec {
        WeakVec(Rc::downgrade(&self.0))
    }

    // -------------------------------------------------------------------------
    // Listeners
    // -------------------------------------------------------------------------

    /// Register a listener on the given channel(s). One registration covers
    /// every requested channel under a single id.
    pub fn on(&self, channels: Channels, l: Listener) -> ListenerId {
        let id = ListenerId(self.0.runtime.next_id());
        if channels.contains(Channels::INDEX) {
            self.0.index_listeners.add(id, l.clone());
        }
        if channels.contains(Channels::LENGTH) {
            self.0.length_listeners.add(id, l);
        }
        id
    }

    pub fn off(&self, channels: Channels, id: ListenerId) -> bool {
        let mut removed = false;
        if channels.contains(Channels::INDEX) {
            removed |= self.0.index_listeners.remove(id);
        }
        if channels.contains(Channels::LENGTH) {
            removed |= self.0.length_listeners.remove(id);
        }
        removed
    }

    pub(crate) fn listener_set(&self, channel: Channels) -> &ListenerSet {
        if channel.contains(Channels::INDEX) {
            &self.0.index_listeners
        } else {
            &self.0.length_listeners
        }
    }

    fn has_observers(&self) -> bool {
        !self.0.index_listeners.is_empty() || !self.0.length_listeners.is_empty()
    }

    /// Register the current evaluator on the given channel(s).
    pub(crate) fn add_caller(&self, channels: Channels) {
        let Some(caller) = self.0.runtime.current_evaluator() else {
            return;
        };
        let key = ActionKey::of(&caller);
        if channels.contains(Channels::INDEX)
            && *self.0.last_index_caller.borrow() != Some(key)
            && !self.0.index_listeners.contains(&caller)
        {
            let id = ListenerId(self.0.runtime.next_id());
            self.0.index_listeners.add(id, caller.clone());
            *self.0.last_index_caller.borrow_mut() = Some(key);
        }
        if channels.contains(Channels::LENGTH)
            && *self.0.last_length_caller.borrow() != Some(key)
            && !self.0.length_listeners.contains(&caller)
        {
            let id = ListenerId(self.0.runtime.next_id());
            self.0.length_listeners.add(id, caller);
            *self.0.last_length_caller.borrow_mut() = Some(key);
        }
    }

    // -------------------------------------------------------------------------
    // Tracked reads
    // -------------------------------------------------------------------------

    /// Tracked slot read.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.add_caller(Channels::INDEX);
        self.0.items.borrow().get(index).cloned()
    }

    /// Tracked length read.
    pub fn len(&self) -> usize {
        self.add_caller(Channels::LENGTH);
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Untracked copy of the current state.
    pub fn snapshot(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    /// Tracked: does `f` hold for every element right now?
    pub fn every<F>(&self, f: F) -> bool
    where
        F: Fn(&Value) -> bool,
    {
        self.add_caller(Channels::CHANGE);
        self.0.items.borrow().iter().all(f)
    }

    /// Tracked: does `f` hold for any element right now?
    pub fn some<F>(&self, f: F) -> bool
    where
        F: Fn(&Value) -> bool,
    {
        self.add_caller(Channels::CHANGE);
        self.0.items.borrow().iter().any(f)
    }

    /// Tracked: first index of `v`, or `None`.
    pub fn index_of(&self, v: &Value) -> Option<usize> {
        self.add_caller(Channels::CHANGE);
        self.0.items.borrow().iter().position(|x| x == v)
    }

    /// Tracked fold over the current state.
    pub fn reduce<F>(&self, init: Value, f: F) -> Value
    where
        F: Fn(&Value, &Value) -> Value,
    {
        self.add_caller(Channels::CHANGE);
        self.0
            .items
            .borrow()
            .iter()
            .fold(init, |acc, v| f(&acc, v))
    }

    /// Tracked visit of every element.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Value),
    {
        self.add_caller(Channels::CHANGE);
        for v in self.0.items.borrow().iter() {
            f(v);
        }
    }

    // -------------------------------------------------------------------------
    // Structural operations
    // -------------------------------------------------------------------------

    /// Replace one slot. Writing the current value is a no-op.
    pub fn set(&self, index: usize, v: Value) -> Result<(), Error> {
        let old = {
            let mut items = self.0.items.borrow_mut();
            let len = items.len();
            let Some(slot) = items.get_mut(index) else {
                return Err(Error::OutOfBounds { index, len });
            };
            if *slot == v {
                return Ok(());
            }
            std::mem::replace(slot, v.clone())
        };
        self.update(VecChange::Set { index, old, new: v })
    }

    pub fn push(&self, v: Value) -> Result<(), Error> {
        self.push_all(vec![v])
    }

    /// Append several values, emitting one event for the whole batch.
    pub fn push_all(&self, values: Vec<Value>) -> Result<(), Error> {
        if values.is_empty() {
            return Ok(());
        }
        let index = {
            let mut items = self.0.items.borrow_mut();
            items.extend(values.iter().cloned());
            items.len() - 1
        };
        self.update(VecChange::Add { index, values })
    }

    pub fn pop(&self) -> Result<Option<Value>, Error> {
        let (index, value) = {
            let mut items = self.0.items.borrow_mut();
            match items.pop() {
                Some(v) => (items.len(), v),
                None => return Ok(None),
            }
        };
        self.update(VecChange::Remove {
            index,
            value: value.clone(),
        })?;
        Ok(Some(value))
    }

    pub fn shift(&self) -> Result<Option<Value>, Error> {
        let value = {
            let mut items = self.0.items.borrow_mut();
            if items.is_empty() {
                return Ok(None);
            }
            items.remove(0)
        };
        self.update(VecChange::Remove {
            index: 0,
            value: value.clone(),
        })?;
        Ok(Some(value))
    }

    pub fn unshift(&self, v: Value) -> Result<(), Error> {
        self.unshift_all(vec![v])
    }

    /// Prepend several values, emitting one event for the whole batch.
    pub fn unshift_all(&self, values: Vec<Value>) -> Result<(), Error> {
        if values.is_empty() {
            return Ok(());
        }
        self.0
            .items
            .borrow_mut()
            .splice(0..0, values.iter().cloned());
        self.update(VecChange::Add { index: 0, values })
    }

    /// Force the length, truncating or extending with `Null`.
    pub fn set_len(&self, new_len: usize) -> Result<(), Error> {
        let old_len = {
            let mut items = self.0.items.borrow_mut();
            let old = items.len();
            if old == new_len {
                return Ok(());
            }
            items.resize(new_len, Value::Null);
            old
        };
        self.update(VecChange::SetLength {
            old: old_len,
            new: new_len,
        })
    }

    pub fn reverse(&self) -> Result<(), Error> {
        {
            let mut items = self.0.items.borrow_mut();
            if items.is_empty() {
                return Ok(());
            }
            items.reverse();
        }
        self.update(VecChange::Reverse)
    }

    /// Sort in place (stable) with the given comparator.
    pub fn sort_by<F>(&self, f: F) -> Result<(), Error>
    where
        F: Fn(&Value, &Value) -> Ordering + 'static,
    {
        let cmp = SortCmp::new(f);
        {
            let mut items = self.0.items.borrow_mut();
            if items.is_empty() {
                return Ok(());
            }
            let c = cmp.clone();
            items.sort_by(move |a, b| (c.0)(a, b));
        }
        self.update(VecChange::Sort { cmp })
    }

    /// Remove `remove` values at `index` and insert `inserted` in their
    /// place. Returns the removed values. Out-of-range pieces are clamped.
    pub fn splice(
        &self,
        index: usize,
        remove: usize,
        inserted: Vec<Value>,
    ) -> Result<Vec<Value>, Error> {
        let (start, removed): (usize, Vec<Value>) = {
            let mut items = self.0.items.borrow_mut();
            let start = index.min(items.len());
            let end = (start + remove).min(items.len());
            let removed = items.splice(start..end, inserted.iter().cloned()).collect();
            (start, removed)
        };
        self.update_splice(start, removed.clone(), inserted)?;
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Update machinery
    // -------------------------------------------------------------------------

    pub(crate) fn update(&self, change: VecChange) -> Result<(), Error> {
        if !self.has_observers() {
            return Ok(());
        }
        let rt = self.0.runtime.clone();
        if rt.flow().is_running() {
            self.will_update(change)
        } else {
            rt.flow().run(|| self.will_update(change))
        }
    }

    fn will_update(&self, change: VecChange) -> Result<(), Error> {
        let listeners = if change.is_index_op() {
            self.0.index_listeners.snapshot()
        } else {
            self.0.length_listeners.snapshot()
        };
        self.will_update_listeners(listeners, Rc::new(Event::vec(change)))
    }

    /// Emit a splice event, routed by what changed: same-size replacements
    /// go to the index channel, pure growth/shrink to the length channel,
    /// mixed changes to both.
    pub(crate) fn update_splice(
        &self,
        index: usize,
        removed: Vec<Value>,
        inserted: Vec<Value>,
    ) -> Result<(), Error> {
        if removed.is_empty() && inserted.is_empty() {
            return Ok(());
        }
        if !self.has_observers() {
            return Ok(());
        }
        let rt = self.0.runtime.clone();
        if rt.flow().is_running() {
            self.will_update_splice(index, removed, inserted)
        } else {
            rt.flow()
                .run(|| self.will_update_splice(index, removed, inserted))
        }
    }

    fn will_update_splice(
        &self,
        index: usize,
        removed: Vec<Value>,
        inserted: Vec<Value>,
    ) -> Result<(), Error> {
        let listeners = if removed.len() == inserted.len() {
            self.0.index_listeners.snapshot()
        } else if removed.is_empty() || inserted.is_empty() {
            self.0.length_listeners.snapshot()
        } else {
            let mut all = self.0.length_listeners.snapshot();
            all.extend(self.0.index_listeners.snapshot());
            all
        };
        let event = Rc::new(Event::vec(VecChange::Splice {
            index,
            removed,
            inserted,
        }));
        self.will_update_listeners(listeners, event)
    }

    fn will_update_listeners(
        &self,
        listeners: Vec<(ListenerId, Listener)>,
        event: Rc<Event>,
    ) -> Result<(), Error> {
        let flow = self.0.runtime.flow();
        for (_, l) in listeners {
            flow.push_once(None, ActionKey::of(&l), l.clone(), event.clone())?;
            if let Some(p) = l.property() {
                p.update(Some(event.as_ref()))?;
            }
        }
        Ok(())
    }

    /// Diff the current state against `old` and emit one splice per run, so
    /// downstream views patch incrementally instead of rebuilding.
    pub(crate) fn emit_diff(&self, old: &[Value]) -> Result<(), Error> {
        let runs = {
            let items = self.0.items.borrow();
            diff::diff(old, &items)
        };
        for run in runs {
            self.update_splice(run.index, run.old, run.new)?;
        }
        Ok(())
    }

    /// Replace the backing state wholesale (derived-view rebuilds), without
    /// emitting; callers follow up with `emit_diff`.
    pub(crate) fn replace_items(&self, items: Vec<Value>) -> Vec<Value> {
        std::mem::replace(&mut *self.0.items.borrow_mut(), items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ReactiveObject;
    use crate::observe::listener;
    use std::cell::RefCell as StdRefCell;

    fn ints(vals: &[i64]) -> Vec<Value> {
        vals.iter().map(|n| Value::Int(*n)).collect()
    }

    fn tracking(vec: &ReactiveVec, ch: Channels) -> Rc<StdRefCell<Vec<String>>> {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let l = log.clone();
        vec.on(
            ch,
            listener(move |e| {
                if let Some(change) = e.vec_change() {
                    l.borrow_mut().push(format!("{change:?}"));
                }
            }),
        );
        log
    }

    #[test]
    fn test_set_emits_on_index_channel_only() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[1, 2, 3]));
        let idx = tracking(&v, Channels::INDEX);
        let len = tracking(&v, Channels::LENGTH);
        v.set(1, Value::Int(9)).unwrap();
        assert_eq!(idx.borrow().len(), 1);
        assert!(len.borrow().is_empty());
        assert_eq!(v.snapshot(), ints(&[1, 9, 3]));
    }

    #[test]
    fn test_push_pop_emit_on_length_channel_only() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[1]));
        let idx = tracking(&v, Channels::INDEX);
        let len = tracking(&v, Channels::LENGTH);
        v.push(Value::Int(2)).unwrap();
        v.pop().unwrap();
        assert!(idx.borrow().is_empty());
        assert_eq!(len.borrow().len(), 2);
    }

    #[test]
    fn test_same_size_splice_routes_to_index_channel() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[1, 2, 3]));
        let idx = tracking(&v, Channels::INDEX);
        let len = tracking(&v, Channels::LENGTH);
        let removed = v.splice(0, 2, ints(&[8, 9])).unwrap();
        assert_eq!(removed, ints(&[1, 2]));
        assert_eq!(idx.borrow().len(), 1);
        assert!(len.borrow().is_empty());
    }

    #[test]
    fn test_size_changing_splice_reaches_both_channels() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[1, 2, 3]));
        let both = tracking(&v, Channels::CHANGE);
        v.splice(0, 2, ints(&[7])).unwrap();
        // Registered on both channels, the listener still hears one splice.
        assert_eq!(both.borrow().len(), 1);
        assert_eq!(v.snapshot(), ints(&[7, 3]));
    }

    #[test]
    fn test_no_event_for_noop_writes() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[1, 2]));
        let all = tracking(&v, Channels::CHANGE);
        v.set(0, Value::Int(1)).unwrap();
        v.set_len(2).unwrap();
        v.splice(1, 0, vec![]).unwrap();
        assert!(v.pop().is_ok());
        assert!(all.borrow().len() == 1); // only the pop
    }

    #[test]
    fn test_out_of_bounds_set_is_refused() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[1]));
        assert!(matches!(
            v.set(5, Value::Int(0)),
            Err(Error::OutOfBounds { index: 5, len: 1 })
        ));
    }

    #[test]
    fn test_set_len_extends_with_null() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[1]));
        v.set_len(3).unwrap();
        assert_eq!(v.snapshot(), vec![Value::Int(1), Value::Null, Value::Null]);
    }

    #[test]
    fn test_computed_field_tracks_length() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[1, 2]));
        let obj = ReactiveObject::new(&rt);
        let vc = v.clone();
        obj.computed("count", move |_| Value::Int(vc.len() as i64))
            .unwrap();
        assert_eq!(obj.get("count"), Value::Int(2));
        v.push(Value::Int(3)).unwrap();
        assert_eq!(obj.get("count"), Value::Int(3));
    }

    #[test]
    fn test_computed_field_tracks_slots() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[5, 6]));
        let obj = ReactiveObject::new(&rt);
        let vc = v.clone();
        obj.computed("first", move |_| vc.get(0).unwrap_or(Value::Null))
            .unwrap();
        assert_eq!(obj.get("first"), Value::Int(5));
        v.set(0, Value::Int(50)).unwrap();
        assert_eq!(obj.get("first"), Value::Int(50));
    }

    #[test]
    fn test_sort_and_reverse_are_index_ops() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[3, 1, 2]));
        let idx = tracking(&v, Channels::INDEX);
        v.sort_by(|a, b| a.as_int().cmp(&b.as_int())).unwrap();
        assert_eq!(v.snapshot(), ints(&[1, 2, 3]));
        v.reverse().unwrap();
        assert_eq!(v.snapshot(), ints(&[3, 2, 1]));
        assert_eq!(idx.borrow().len(), 2);
    }

    #[test]
    fn test_batched_ops_collapse_for_one_listener_per_run() {
        let rt = Runtime::new();
        let v = ReactiveVec::from_values(&rt, ints(&[1]));
        let hits = Rc::new(StdRefCell::new(0));
        let h = hits.clone();
        v.on(Channels::LENGTH, listener(move |_| *h.borrow_mut() += 1));
        rt.run(|| {
            v.push(Value::Int(2))?;
            v.push(Value::Int(3))?;
            Ok(())
        })
        .unwrap();
        // De-duplicated by listener identity: one delivery for the run.
        assert_eq!(*hits.borrow(), 1);
    }
}
