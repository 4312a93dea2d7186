//! Derived views over reactive sequences.
//!
//! Each derivation builds its initial state eagerly from the source, then
//! registers an incremental updater on both source channels. The updater
//! translates every source event into the cheapest patch that keeps the view
//! consistent: slot writes map to slot writes, batched adds map to batched
//! adds, and only events whose effect cannot be determined locally fall back
//! to a full re-derivation, diffed against the previous state and applied as
//! replace-in-place splices so downstream views patch incrementally too.
//!
//! Ownership: the updater holds the derived view strongly and the source
//! weakly - a view lives exactly as long as its source (or any handle the
//! caller keeps), and a dropped source simply stops updating it.

use std::cell::Cell;
use std::rc::Rc;

use crate::object::ReactiveVal;
use crate::observe::{try_listener, Listener};
use crate::types::Value;

use super::{Channels, ReactiveVec, SortCmp, VecChange, WeakVec};

/// Slot mapper: value and source index in, derived value out.
pub type MapFn = Rc<dyn Fn(&Value, usize) -> Value>;
/// Filtering predicate.
pub type PredFn = Rc<dyn Fn(&Value) -> bool>;
/// Fold step: accumulator and element in, next accumulator out.
pub type FoldFn = Rc<dyn Fn(&Value, &Value) -> Value>;

impl ReactiveVec {
    /// A live mapped view of this sequence.
    pub fn map<F>(&self, f: F) -> ReactiveVec
    where
        F: Fn(&Value, usize) -> Value + 'static,
    {
        let f: MapFn = Rc::new(f);
        let initial: Vec<Value> = self
            .snapshot()
            .iter()
            .enumerate()
            .map(|(i, v)| f(v, i))
            .collect();
        let derived = ReactiveVec::from_values(self.runtime(), initial);
        self.on(
            Channels::CHANGE,
            map_updater(derived.clone(), self.downgrade(), f),
        );
        derived
    }

    /// A live filtered view of this sequence.
    pub fn filter<F>(&self, f: F) -> ReactiveVec
    where
        F: Fn(&Value) -> bool + 'static,
    {
        let f: PredFn = Rc::new(f);
        let initial: Vec<Value> = self.snapshot().into_iter().filter(|v| f(v)).collect();
        let derived = ReactiveVec::from_values(self.runtime(), initial);
        self.on(
            Channels::CHANGE,
            filter_updater(derived.clone(), self.downgrade(), f),
        );
        derived
    }

    /// A live window `[start, end)` of this sequence (`end == None` means
    /// "to the end").
    pub fn slice(&self, start: usize, end: Option<usize>) -> ReactiveVec {
        let derived = ReactiveVec::from_values(self.runtime(), slice_of(&self.snapshot(), start, end));
        self.on(
            Channels::CHANGE,
            slice_updater(derived.clone(), self.downgrade(), start, end),
        );
        derived
    }

    /// A live concatenation of this sequence and `right`. Events from the
    /// right source are applied with their indices offset by the left
    /// sequence's length.
    pub fn concat(&self, right: &ReactiveVec) -> ReactiveVec {
        let initial: Vec<Value> = [self.snapshot(), right.snapshot()].concat();
        let derived = ReactiveVec::from_values(self.runtime(), initial);
        self.on(
            Channels::CHANGE,
            left_concat_updater(derived.clone(), self.downgrade(), right.downgrade()),
        );
        right.on(
            Channels::CHANGE,
            right_concat_updater(derived.clone(), self.downgrade(), right.downgrade()),
        );
        derived
    }

    /// A live "every element satisfies `f`" value.
    pub fn live_every<F>(&self, f: F) -> ReactiveVal
    where
        F: Fn(&Value) -> bool + 'static,
    {
        let f: PredFn = Rc::new(f);
        let val = ReactiveVal::new(
            self.runtime(),
            Value::Bool(self.snapshot().iter().all(|v| f(v))),
        );
        self.on(
            Channels::CHANGE,
            every_updater(val.clone(), self.downgrade(), f),
        );
        val
    }

    /// A live "some element satisfies `f`" value.
    pub fn live_some<F>(&self, f: F) -> ReactiveVal
    where
        F: Fn(&Value) -> bool + 'static,
    {
        let f: PredFn = Rc::new(f);
        let val = ReactiveVal::new(
            self.runtime(),
            Value::Bool(self.snapshot().iter().any(|v| f(v))),
        );
        self.on(
            Channels::CHANGE,
            some_updater(val.clone(), self.downgrade(), f),
        );
        val
    }

    /// A live first-index-of value (`-1` when absent).
    pub fn live_index_of(&self, what: Value) -> ReactiveVal {
        self.live_index_of_from(what, None)
    }

    /// A live first-index-of value searching from `from` onward.
    pub fn live_index_of_from(&self, what: Value, from: Option<usize>) -> ReactiveVal {
        let val = ReactiveVal::new(
            self.runtime(),
            Value::Int(find_first(&self.snapshot(), &what, from)),
        );
        self.on(
            Channels::CHANGE,
            index_of_updater(val.clone(), self.downgrade(), what, from),
        );
        val
    }

    /// A live last-index-of value (`-1` when absent).
    pub fn live_last_index_of(&self, what: Value) -> ReactiveVal {
        self.live_last_index_of_from(what, None)
    }

    /// A live last-index-of value searching up to `from`.
    pub fn live_last_index_of_from(&self, what: Value, from: Option<usize>) -> ReactiveVal {
        let val = ReactiveVal::new(
            self.runtime(),
            Value::Int(find_last(&self.snapshot(), &what, from)),
        );
        self.on(
            Channels::CHANGE,
            last_index_of_updater(val.clone(), self.downgrade(), what, from),
        );
        val
    }

    /// A live left fold. Appends extend the fold incrementally; anything
    /// else recomputes from `init`.
    pub fn live_reduce<F>(&self, init: Value, f: F) -> ReactiveVal
    where
        F: Fn(&Value, &Value) -> Value + 'static,
    {
        let f: FoldFn = Rc::new(f);
        let snapshot = self.snapshot();
        let val = ReactiveVal::new(
            self.runtime(),
            snapshot.iter().fold(init.clone(), |acc, v| f(&acc, v)),
        );
        self.on(
            Channels::CHANGE,
            reduce_updater(val.clone(), self.downgrade(), init, f, snapshot.len()),
        );
        val
    }

    /// A live right fold. Prepends extend the fold incrementally; anything
    /// else recomputes from `init`.
    pub fn live_reduce_right<F>(&self, init: Value, f: F) -> ReactiveVal
    where
        F: Fn(&Value, &Value) -> Value + 'static,
    {
        let f: FoldFn = Rc::new(f);
        let val = ReactiveVal::new(
            self.runtime(),
            self.snapshot()
                .iter()
                .rev()
                .fold(init.clone(), |acc, v| f(&acc, v)),
        );
        self.on(
            Channels::CHANGE,
            reduce_right_updater(val.clone(), self.downgrade(), init, f),
        );
        val
    }
}

// =============================================================================
// Sequence-view updaters
// =============================================================================

fn map_updater(derived: ReactiveVec, source: WeakVec, f: MapFn) -> Listener {
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let Some(src) = source.upgrade() else {
            return Ok(());
        };
        match change {
            VecChange::Set { index, new, .. } => {
                derived.set(*index, f(new, *index))?;
            }
            VecChange::Add { index, values } => {
                let n = values.len();
                if *index == 0 {
                    let mapped = values.iter().enumerate().map(|(j, v)| f(v, j)).collect();
                    derived.unshift_all(mapped)?;
                } else {
                    let src_len = src.snapshot().len();
                    let mapped = values
                        .iter()
                        .enumerate()
                        .map(|(j, v)| f(v, src_len - (n - j)))
                        .collect();
                    derived.push_all(mapped)?;
                }
            }
            VecChange::Remove { index, .. } => {
                if *index == 0 {
                    derived.shift()?;
                } else {
                    derived.pop()?;
                }
            }
            VecChange::SetLength { new, .. } => derived.set_len(*new)?,
            VecChange::Reverse | VecChange::Sort { .. } => {
                // The source comparator orders source values, not mapped
                // ones, so permutations remap and diff.
                let remapped = src
                    .snapshot()
                    .iter()
                    .enumerate()
                    .map(|(i, v)| f(v, i))
                    .collect();
                let old = derived.replace_items(remapped);
                derived.emit_diff(&old)?;
            }
            VecChange::Splice {
                index,
                removed,
                inserted,
            } => {
                let mapped = inserted
                    .iter()
                    .enumerate()
                    .map(|(j, v)| f(v, index + j))
                    .collect();
                derived.splice(*index, removed.len(), mapped)?;
            }
        }
        Ok(())
    })
}

fn refilter(src: &ReactiveVec, derived: &ReactiveVec, f: &PredFn) -> Result<(), crate::error::Error> {
    let filtered: Vec<Value> = src.snapshot().into_iter().filter(|v| f(v)).collect();
    let old = derived.replace_items(filtered);
    derived.emit_diff(&old)
}

fn filter_updater(derived: ReactiveVec, source: WeakVec, f: PredFn) -> Listener {
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let Some(src) = source.upgrade() else {
            return Ok(());
        };
        match change {
            VecChange::Set { old, new, .. } => {
                // Which slot of the view corresponds to the write is not
                // locally determinable; re-filter when it could matter.
                if f(old) || f(new) {
                    refilter(&src, &derived, &f)?;
                }
            }
            VecChange::Add { index, values } => {
                let passing: Vec<Value> = values.iter().filter(|v| f(v)).cloned().collect();
                if passing.is_empty() {
                    return Ok(());
                }
                if *index == 0 {
                    derived.unshift_all(passing)?;
                } else {
                    derived.push_all(passing)?;
                }
            }
            VecChange::Remove { index, value } => {
                if f(value) {
                    if *index == 0 {
                        derived.shift()?;
                    } else {
                        derived.pop()?;
                    }
                }
            }
            VecChange::SetLength { .. } | VecChange::Splice { .. } => {
                refilter(&src, &derived, &f)?;
            }
            VecChange::Reverse => derived.reverse()?,
            VecChange::Sort { cmp } => {
                // A subset keeps the source ordering under the same
                // comparator (both sorts are stable).
                let c = cmp.clone();
                derived.sort_by(move |a, b| (c.0)(a, b))?;
            }
        }
        Ok(())
    })
}

fn slice_of(items: &[Value], start: usize, end: Option<usize>) -> Vec<Value> {
    let stop = end.unwrap_or(items.len()).min(items.len());
    let start = start.min(stop);
    items[start..stop].to_vec()
}

fn slice_updater(derived: ReactiveVec, source: WeakVec, start: usize, end: Option<usize>) -> Listener {
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let Some(src) = source.upgrade() else {
            return Ok(());
        };
        match change {
            VecChange::Set { index, new, .. }
                if *index >= start && end.is_none_or(|e| *index < e) =>
            {
                derived.set(index - start, new.clone())?;
            }
            VecChange::Set { .. } => {}
            _ => {
                let old = derived.replace_items(slice_of(&src.snapshot(), start, end));
                derived.emit_diff(&old)?;
            }
        }
        Ok(())
    })
}

fn rebuild_concat(
    derived: &ReactiveVec,
    left: &WeakVec,
    right: &WeakVec,
) -> Result<(), crate::error::Error> {
    let mut items = left.upgrade().map(|v| v.snapshot()).unwrap_or_default();
    items.extend(right.upgrade().map(|v| v.snapshot()).unwrap_or_default());
    let old = derived.replace_items(items);
    derived.emit_diff(&old)
}

fn left_concat_updater(derived: ReactiveVec, left: WeakVec, right: WeakVec) -> Listener {
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let right_len = right.upgrade().map(|v| v.snapshot().len()).unwrap_or(0);
        match change {
            VecChange::Set { index, new, .. } => derived.set(*index, new.clone())?,
            VecChange::Add { index, values } => {
                if *index == 0 {
                    derived.unshift_all(values.clone())?;
                } else {
                    let at = derived.snapshot().len().saturating_sub(right_len);
                    derived.splice(at, 0, values.clone())?;
                }
            }
            VecChange::Remove { index, .. } => {
                if *index == 0 {
                    derived.shift()?;
                } else {
                    let at = derived.snapshot().len().saturating_sub(right_len + 1);
                    derived.splice(at, 1, vec![])?;
                }
            }
            VecChange::SetLength { old, new } => {
                if new < old {
                    derived.splice(*new, old - new, vec![])?;
                } else {
                    derived.splice(*old, 0, vec![Value::Null; new - old])?;
                }
            }
            VecChange::Reverse | VecChange::Sort { .. } => {
                rebuild_concat(&derived, &left, &right)?;
            }
            VecChange::Splice {
                index,
                removed,
                inserted,
            } => {
                derived.splice(*index, removed.len(), inserted.clone())?;
            }
        }
        Ok(())
    })
}

fn right_concat_updater(derived: ReactiveVec, left: WeakVec, right: WeakVec) -> Listener {
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let left_len = left.upgrade().map(|v| v.snapshot().len()).unwrap_or(0);
        match change {
            VecChange::Set { index, new, .. } => derived.set(left_len + index, new.clone())?,
            VecChange::Add { index, values } => {
                if *index == 0 {
                    derived.splice(left_len, 0, values.clone())?;
                } else {
                    derived.push_all(values.clone())?;
                }
            }
            VecChange::Remove { index, .. } => {
                if *index == 0 {
                    derived.splice(left_len, 1, vec![])?;
                } else {
                    derived.pop()?;
                }
            }
            VecChange::SetLength { new, .. } => derived.set_len(left_len + new)?,
            VecChange::Reverse | VecChange::Sort { .. } => {
                rebuild_concat(&derived, &left, &right)?;
            }
            VecChange::Splice {
                index,
                removed,
                inserted,
            } => {
                derived.splice(left_len + index, removed.len(), inserted.clone())?;
            }
        }
        Ok(())
    })
}

// =============================================================================
// Live scalar updaters
// =============================================================================

fn every_updater(val: ReactiveVal, source: WeakVec, f: PredFn) -> Listener {
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let Some(src) = source.upgrade() else {
            return Ok(());
        };
        let current = val.get().as_bool().unwrap_or(false);
        let full = |val: &ReactiveVal| {
            val.set(Value::Bool(src.snapshot().iter().all(|v| f(v))))
        };
        match change {
            VecChange::Set { new, .. } => {
                let passes = f(new);
                if current && !passes {
                    val.set(Value::Bool(false))?;
                } else if !current && passes {
                    full(&val)?;
                }
            }
            VecChange::Add { values, .. } => {
                if current {
                    val.set(Value::Bool(values.iter().all(|v| f(v))))?;
                }
            }
            VecChange::Remove { value, .. } => {
                // Removing a failing element may flip the view to true.
                if !current && !f(value) {
                    full(&val)?;
                }
            }
            VecChange::SetLength { old, new } => {
                if new > old {
                    if current {
                        val.set(Value::Bool(f(&Value::Null)))?;
                    }
                } else if !current {
                    full(&val)?;
                }
            }
            VecChange::Splice {
                removed, inserted, ..
            } => {
                if current {
                    val.set(Value::Bool(inserted.iter().all(|v| f(v))))?;
                } else if inserted.iter().all(|v| f(v)) && !removed.iter().all(|v| f(v)) {
                    full(&val)?;
                }
            }
            VecChange::Reverse | VecChange::Sort { .. } => {}
        }
        Ok(())
    })
}

fn some_updater(val: ReactiveVal, source: WeakVec, f: PredFn) -> Listener {
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let Some(src) = source.upgrade() else {
            return Ok(());
        };
        let current = val.get().as_bool().unwrap_or(false);
        let full = |val: &ReactiveVal| {
            val.set(Value::Bool(src.snapshot().iter().any(|v| f(v))))
        };
        match change {
            VecChange::Set { new, .. } => {
                let passes = f(new);
                if !current && passes {
                    val.set(Value::Bool(true))?;
                } else if current && !passes {
                    full(&val)?;
                }
            }
            VecChange::Add { values, .. } => {
                if !current {
                    val.set(Value::Bool(values.iter().any(|v| f(v))))?;
                }
            }
            VecChange::Remove { value, .. } => {
                // Removing a passing element may flip the view to false.
                if current && f(value) {
                    full(&val)?;
                }
            }
            VecChange::SetLength { old, new } => {
                if new < old {
                    if current {
                        full(&val)?;
                    }
                } else if !current {
                    val.set(Value::Bool(f(&Value::Null)))?;
                }
            }
            VecChange::Splice {
                removed, inserted, ..
            } => {
                if !current {
                    val.set(Value::Bool(inserted.iter().any(|v| f(v))))?;
                } else if removed.iter().any(|v| f(v)) && !inserted.iter().any(|v| f(v)) {
                    full(&val)?;
                }
            }
            VecChange::Reverse | VecChange::Sort { .. } => {}
        }
        Ok(())
    })
}

fn find_first(items: &[Value], what: &Value, from: Option<usize>) -> i64 {
    let start = from.unwrap_or(0);
    items
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, v)| *v == what)
        .map(|(i, _)| i as i64)
        .unwrap_or(-1)
}

fn find_last(items: &[Value], what: &Value, from: Option<usize>) -> i64 {
    let stop = from.map(|f| (f + 1).min(items.len())).unwrap_or(items.len());
    items[..stop]
        .iter()
        .rposition(|v| v == what)
        .map(|i| i as i64)
        .unwrap_or(-1)
}

fn index_of_updater(val: ReactiveVal, source: WeakVec, what: Value, from: Option<usize>) -> Listener {
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let Some(src) = source.upgrade() else {
            return Ok(());
        };
        let current = val.get().as_int().unwrap_or(-1);
        let in_range = |i: usize| from.is_none_or(|f| i >= f);
        let full = |val: &ReactiveVal| {
            val.set(Value::Int(find_first(&src.snapshot(), &what, from)))
        };
        match change {
            VecChange::Set { index, old, new } => {
                if *old == what {
                    full(&val)?;
                } else if *new == what && in_range(*index) && (current == -1 || (*index as i64) < current)
                {
                    val.set(Value::Int(*index as i64))?;
                }
            }
            VecChange::Add { index: 0, values } => {
                if from.is_some() {
                    full(&val)?;
                } else if let Some(nvi) = values.iter().position(|v| v == &what) {
                    val.set(Value::Int(nvi as i64))?;
                } else if current != -1 {
                    val.set(Value::Int(current + values.len() as i64))?;
                }
            }
            VecChange::Add { values, .. } => {
                if current == -1
                    && let Some(nvi) = values.iter().position(|v| v == &what)
                {
                    let first = src.snapshot().len() - values.len();
                    let pos = first + nvi;
                    if in_range(pos) {
                        val.set(Value::Int(pos as i64))?;
                    }
                }
            }
            VecChange::Remove { index: 0, .. } => {
                if from.is_some() || current == 0 {
                    // With a search floor, or when the found occurrence
                    // itself went away, recompute.
                    full(&val)?;
                } else if current > 0 {
                    val.set(Value::Int(current - 1))?;
                }
            }
            VecChange::Remove { value, .. } => {
                if *value == what {
                    full(&val)?;
                }
            }
            VecChange::SetLength { old, new } => {
                if new < old {
                    if current >= *new as i64 {
                        val.set(Value::Int(-1))?;
                    }
                } else if what.is_null() {
                    full(&val)?;
                }
            }
            VecChange::Reverse | VecChange::Sort { .. } | VecChange::Splice { .. } => {
                full(&val)?;
            }
        }
        Ok(())
    })
}

fn last_index_of_updater(
    val: ReactiveVal,
    source: WeakVec,
    what: Value,
    from: Option<usize>,
) -> Listener {
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let Some(src) = source.upgrade() else {
            return Ok(());
        };
        let current = val.get().as_int().unwrap_or(-1);
        let in_range = |i: usize| from.is_none_or(|f| i <= f);
        let full = |val: &ReactiveVal| {
            val.set(Value::Int(find_last(&src.snapshot(), &what, from)))
        };
        match change {
            VecChange::Set { index, old, new } => {
                if *old == what {
                    full(&val)?;
                } else if *new == what && in_range(*index) && (*index as i64) > current {
                    val.set(Value::Int(*index as i64))?;
                }
            }
            VecChange::Add { index: 0, values } => {
                if from.is_some() {
                    full(&val)?;
                } else if current != -1 {
                    val.set(Value::Int(current + values.len() as i64))?;
                } else if let Some(nvi) = values.iter().rposition(|v| v == &what) {
                    val.set(Value::Int(nvi as i64))?;
                }
            }
            VecChange::Add { values, .. } => {
                if let Some(nvi) = values.iter().rposition(|v| v == &what) {
                    let first = src.snapshot().len() - values.len();
                    let pos = first + nvi;
                    if in_range(pos) {
                        val.set(Value::Int(pos as i64))?;
                    } else {
                        full(&val)?;
                    }
                }
            }
            VecChange::Remove { index: 0, .. } => {
                if from.is_some() {
                    full(&val)?;
                } else if current != -1 {
                    val.set(Value::Int(current - 1))?;
                }
            }
            VecChange::Remove { value, .. } => {
                if *value == what {
                    full(&val)?;
                }
            }
            VecChange::SetLength { old, new } => {
                if new < old || what.is_null() {
                    full(&val)?;
                }
            }
            VecChange::Reverse | VecChange::Sort { .. } | VecChange::Splice { .. } => {
                full(&val)?;
            }
        }
        Ok(())
    })
}

fn reduce_updater(
    val: ReactiveVal,
    source: WeakVec,
    init: Value,
    f: FoldFn,
    initial_len: usize,
) -> Listener {
    let old_len = Cell::new(initial_len);
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let Some(src) = source.upgrade() else {
            return Ok(());
        };
        let appended = match change {
            VecChange::Add { index, values } if *index != 0 => Some(values),
            VecChange::Splice {
                index,
                removed,
                inserted,
            } if *index >= old_len.get() && removed.is_empty() => Some(inserted),
            _ => None,
        };
        match appended {
            Some(values) => {
                let next = values.iter().fold(val.get(), |acc, v| f(&acc, v));
                val.set(next)?;
            }
            None => {
                let next = src
                    .snapshot()
                    .iter()
                    .fold(init.clone(), |acc, v| f(&acc, v));
                val.set(next)?;
            }
        }
        old_len.set(src.snapshot().len());
        Ok(())
    })
}

fn reduce_right_updater(val: ReactiveVal, source: WeakVec, init: Value, f: FoldFn) -> Listener {
    try_listener(move |event| {
        let Some(change) = event.vec_change() else {
            return Ok(());
        };
        let Some(src) = source.upgrade() else {
            return Ok(());
        };
        let prepended = match change {
            VecChange::Add { index: 0, values } => Some(values),
            VecChange::Splice {
                index: 0,
                removed,
                inserted,
            } if removed.is_empty() => Some(inserted),
            _ => None,
        };
        match prepended {
            Some(values) => {
                let next = values.iter().rev().fold(val.get(), |acc, v| f(&acc, v));
                val.set(next)?;
            }
            None => {
                let next = src
                    .snapshot()
                    .iter()
                    .rev()
                    .fold(init.clone(), |acc, v| f(&acc, v));
                val.set(next)?;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    fn ints(vals: &[i64]) -> Vec<Value> {
        vals.iter().map(|n| Value::Int(*n)).collect()
    }

    fn is_even(v: &Value) -> bool {
        v.as_int().map(|n| n % 2 == 0).unwrap_or(false)
    }

    #[test]
    fn test_map_patches_slot_writes_and_batches() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[1, 2]));
        let doubled = src.map(|v, _| Value::Int(v.as_int().unwrap_or(0) * 2));
        assert_eq!(doubled.snapshot(), ints(&[2, 4]));

        src.set(0, Value::Int(10)).unwrap();
        assert_eq!(doubled.snapshot(), ints(&[20, 4]));

        src.push_all(ints(&[5, 6])).unwrap();
        assert_eq!(doubled.snapshot(), ints(&[20, 4, 10, 12]));

        src.unshift(Value::Int(1)).unwrap();
        assert_eq!(doubled.snapshot(), ints(&[2, 20, 4, 10, 12]));

        src.pop().unwrap();
        src.shift().unwrap();
        assert_eq!(doubled.snapshot(), ints(&[20, 4, 10]));

        src.splice(1, 1, ints(&[7, 8])).unwrap();
        assert_eq!(doubled.snapshot(), ints(&[20, 14, 16, 10]));
    }

    #[test]
    fn test_map_survives_sort_with_source_comparator() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[3, 1, 2]));
        let negated = src.map(|v, _| Value::Int(-v.as_int().unwrap_or(0)));
        src.sort_by(|a, b| a.as_int().cmp(&b.as_int())).unwrap();
        // Sorted source, remapped view - not a sort of the mapped values.
        assert_eq!(src.snapshot(), ints(&[1, 2, 3]));
        assert_eq!(negated.snapshot(), ints(&[-1, -2, -3]));
    }

    #[test]
    fn test_filter_incremental_add_remove() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[1, 2, 3, 4]));
        let evens = src.filter(is_even);
        assert_eq!(evens.snapshot(), ints(&[2, 4]));

        src.push(Value::Int(6)).unwrap();
        assert_eq!(evens.snapshot(), ints(&[2, 4, 6]));

        src.push(Value::Int(7)).unwrap();
        assert_eq!(evens.snapshot(), ints(&[2, 4, 6]));

        src.pop().unwrap(); // 7, fails predicate: view untouched
        assert_eq!(evens.snapshot(), ints(&[2, 4, 6]));

        src.pop().unwrap(); // 6, passes: drops from the view
        assert_eq!(evens.snapshot(), ints(&[2, 4]));

        src.unshift(Value::Int(0)).unwrap();
        assert_eq!(evens.snapshot(), ints(&[0, 2, 4]));
    }

    #[test]
    fn test_filter_refilters_on_set_and_splice() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[1, 2, 3]));
        let evens = src.filter(is_even);
        src.set(0, Value::Int(8)).unwrap();
        assert_eq!(evens.snapshot(), ints(&[8, 2]));
        src.splice(1, 2, ints(&[5, 6, 7])).unwrap();
        assert_eq!(evens.snapshot(), ints(&[8, 6]));
    }

    #[test]
    fn test_filter_follows_sort_and_reverse() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[4, 1, 2, 3]));
        let evens = src.filter(is_even);
        assert_eq!(evens.snapshot(), ints(&[4, 2]));
        src.sort_by(|a, b| a.as_int().cmp(&b.as_int())).unwrap();
        assert_eq!(evens.snapshot(), ints(&[2, 4]));
        src.reverse().unwrap();
        assert_eq!(evens.snapshot(), ints(&[4, 2]));
    }

    #[test]
    fn test_chained_views_stay_consistent() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[1, 2, 3, 4, 5]));
        let evens_doubled = src
            .filter(is_even)
            .map(|v, _| Value::Int(v.as_int().unwrap_or(0) * 10));
        assert_eq!(evens_doubled.snapshot(), ints(&[20, 40]));
        src.push(Value::Int(6)).unwrap();
        src.shift().unwrap();
        assert_eq!(evens_doubled.snapshot(), ints(&[20, 40, 60]));
    }

    #[test]
    fn test_slice_window() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[0, 1, 2, 3, 4]));
        let window = src.slice(1, Some(4));
        assert_eq!(window.snapshot(), ints(&[1, 2, 3]));

        src.set(2, Value::Int(20)).unwrap();
        assert_eq!(window.snapshot(), ints(&[1, 20, 3]));

        // A write outside the window leaves it alone.
        src.set(4, Value::Int(40)).unwrap();
        assert_eq!(window.snapshot(), ints(&[1, 20, 3]));

        src.shift().unwrap();
        assert_eq!(window.snapshot(), ints(&[20, 3, 40]));
    }

    #[test]
    fn test_concat_left_and_right_events() {
        let rt = Runtime::new();
        let left = ReactiveVec::from_values(&rt, ints(&[1, 2]));
        let right = ReactiveVec::from_values(&rt, ints(&[10, 20]));
        let joined = left.concat(&right);
        assert_eq!(joined.snapshot(), ints(&[1, 2, 10, 20]));

        left.push(Value::Int(3)).unwrap();
        assert_eq!(joined.snapshot(), ints(&[1, 2, 3, 10, 20]));

        right.unshift(Value::Int(9)).unwrap();
        assert_eq!(joined.snapshot(), ints(&[1, 2, 3, 9, 10, 20]));

        right.set(2, Value::Int(21)).unwrap();
        assert_eq!(joined.snapshot(), ints(&[1, 2, 3, 9, 10, 21]));

        left.shift().unwrap();
        assert_eq!(joined.snapshot(), ints(&[2, 3, 9, 10, 21]));

        right.pop().unwrap();
        assert_eq!(joined.snapshot(), ints(&[2, 3, 9, 10]));

        left.sort_by(|a, b| b.as_int().cmp(&a.as_int())).unwrap();
        assert_eq!(joined.snapshot(), ints(&[3, 2, 9, 10]));
    }

    #[test]
    fn test_live_every_transitions() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[2, 4]));
        let all_even = src.live_every(is_even);
        assert_eq!(all_even.get(), Value::Bool(true));

        src.push(Value::Int(5)).unwrap();
        assert_eq!(all_even.get(), Value::Bool(false));

        src.pop().unwrap();
        assert_eq!(all_even.get(), Value::Bool(true));

        src.set(0, Value::Int(3)).unwrap();
        assert_eq!(all_even.get(), Value::Bool(false));

        src.set(0, Value::Int(8)).unwrap();
        assert_eq!(all_even.get(), Value::Bool(true));
    }

    #[test]
    fn test_live_some_transitions() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[1, 3]));
        let any_even = src.live_some(is_even);
        assert_eq!(any_even.get(), Value::Bool(false));

        src.push(Value::Int(2)).unwrap();
        assert_eq!(any_even.get(), Value::Bool(true));

        src.pop().unwrap();
        assert_eq!(any_even.get(), Value::Bool(false));

        src.splice(0, 1, ints(&[6])).unwrap();
        assert_eq!(any_even.get(), Value::Bool(true));
    }

    #[test]
    fn test_live_index_of_tracks_moves() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[5, 7, 9]));
        let idx = src.live_index_of(Value::Int(7));
        assert_eq!(idx.get(), Value::Int(1));

        src.unshift(Value::Int(0)).unwrap();
        assert_eq!(idx.get(), Value::Int(2));

        src.shift().unwrap();
        assert_eq!(idx.get(), Value::Int(1));

        src.set(1, Value::Int(8)).unwrap();
        assert_eq!(idx.get(), Value::Int(-1));

        src.push(Value::Int(7)).unwrap();
        assert_eq!(idx.get(), Value::Int(3));

        src.sort_by(|a, b| a.as_int().cmp(&b.as_int())).unwrap();
        assert_eq!(src.snapshot(), ints(&[5, 7, 8, 9]));
        assert_eq!(idx.get(), Value::Int(1));
    }

    #[test]
    fn test_live_last_index_of() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[7, 1, 7]));
        let idx = src.live_last_index_of(Value::Int(7));
        assert_eq!(idx.get(), Value::Int(2));

        src.push(Value::Int(7)).unwrap();
        assert_eq!(idx.get(), Value::Int(3));

        src.pop().unwrap();
        assert_eq!(idx.get(), Value::Int(2));

        src.pop().unwrap();
        assert_eq!(idx.get(), Value::Int(0));
    }

    #[test]
    fn test_live_reduce_appends_incrementally() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, ints(&[1, 2]));
        let sum = src.live_reduce(Value::Int(0), |acc, v| {
            Value::Int(acc.as_int().unwrap_or(0) + v.as_int().unwrap_or(0))
        });
        assert_eq!(sum.get(), Value::Int(3));

        src.push(Value::Int(10)).unwrap();
        assert_eq!(sum.get(), Value::Int(13));

        src.set(0, Value::Int(5)).unwrap();
        assert_eq!(sum.get(), Value::Int(17));

        src.pop().unwrap();
        assert_eq!(sum.get(), Value::Int(7));
    }

    #[test]
    fn test_live_reduce_right_prepends_incrementally() {
        let rt = Runtime::new();
        let src = ReactiveVec::from_values(&rt, vec![Value::from("b"), Value::from("c")]);
        let joined = src.live_reduce_right(Value::from(""), |acc, v| {
            let mut s = acc.as_str().unwrap_or("").to_string();
            s.push_str(v.as_str().unwrap_or(""));
            Value::from(s)
        });
        // Right fold walks back-to-front.
        assert_eq!(joined.get(), Value::from("cb"));
        src.unshift(Value::from("a")).unwrap();
        assert_eq!(joined.get(), Value::from("cba"));
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Op {
            Set(usize, i64),
            Push(i64),
            Pop,
            Shift,
            Unshift(i64),
            Splice(usize, usize, Vec<i64>),
            Sort,
            Reverse,
            SetLen(usize),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0usize..8, 0i64..10).prop_map(|(i, v)| Op::Set(i, v)),
                (0i64..10).prop_map(Op::Push),
                Just(Op::Pop),
                Just(Op::Shift),
                (0i64..10).prop_map(Op::Unshift),
                (0usize..8, 0usize..4, proptest::collection::vec(0i64..10, 0..4))
                    .prop_map(|(i, d, vs)| Op::Splice(i, d, vs)),
                Just(Op::Sort),
                Just(Op::Reverse),
                (0usize..10).prop_map(Op::SetLen),
            ]
        }

        fn apply_op(vec: &ReactiveVec, model: &mut Vec<i64>, op: &Op) {
            match op {
                Op::Set(i, v) => {
                    if *i < model.len() {
                        model[*i] = *v;
                        vec.set(*i, Value::Int(*v)).unwrap();
                    }
                }
                Op::Push(v) => {
                    model.push(*v);
                    vec.push(Value::Int(*v)).unwrap();
                }
                Op::Pop => {
                    model.pop();
                    vec.pop().unwrap();
                }
                Op::Shift => {
                    if !model.is_empty() {
                        model.remove(0);
                    }
                    vec.shift().unwrap();
                }
                Op::Unshift(v) => {
                    model.insert(0, *v);
                    vec.unshift(Value::Int(*v)).unwrap();
                }
                Op::Splice(i, d, vs) => {
                    let start = (*i).min(model.len());
                    let end = (start + d).min(model.len());
                    model.splice(start..end, vs.iter().copied());
                    vec.splice(*i, *d, vs.iter().map(|v| Value::Int(*v)).collect())
                        .unwrap();
                }
                Op::Sort => {
                    model.sort();
                    vec.sort_by(|a, b| a.as_int().cmp(&b.as_int())).unwrap();
                }
                Op::Reverse => {
                    model.reverse();
                    vec.reverse().unwrap();
                }
                Op::SetLen(n) => {
                    // The reactive vec extends with Null; keep the model to
                    // shrinking so both sides stay comparable.
                    if *n <= model.len() {
                        model.truncate(*n);
                        vec.set_len(*n).unwrap();
                    }
                }
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn filtered_view_always_equals_full_refilter(
                initial in proptest::collection::vec(0i64..10, 0..8),
                ops in proptest::collection::vec(op_strategy(), 1..24),
            ) {
                let rt = Runtime::new();
                let mut model = initial.clone();
                let vec = ReactiveVec::from_values(
                    &rt,
                    initial.iter().map(|v| Value::Int(*v)).collect(),
                );
                let evens = vec.filter(is_even);
                for op in &ops {
                    apply_op(&vec, &mut model, op);
                    let expect: Vec<Value> = model
                        .iter()
                        .filter(|v| *v % 2 == 0)
                        .map(|v| Value::Int(*v))
                        .collect();
                    prop_assert_eq!(evens.snapshot(), expect);
                }
            }

            #[test]
            fn mapped_view_always_equals_full_remap(
                initial in proptest::collection::vec(0i64..10, 0..8),
                ops in proptest::collection::vec(op_strategy(), 1..24),
            ) {
                let rt = Runtime::new();
                let mut model = initial.clone();
                let vec = ReactiveVec::from_values(
                    &rt,
                    initial.iter().map(|v| Value::Int(*v)).collect(),
                );
                let tripled = vec.map(|v, _| Value::Int(v.as_int().unwrap_or(0) * 3));
                for op in &ops {
                    apply_op(&vec, &mut model, op);
                    let expect: Vec<Value> =
                        model.iter().map(|v| Value::Int(v * 3)).collect();
                    prop_assert_eq!(tripled.snapshot(), expect);
                }
            }

            #[test]
            fn live_queries_always_match_recomputation(
                initial in proptest::collection::vec(0i64..10, 0..8),
                ops in proptest::collection::vec(op_strategy(), 1..24),
            ) {
                let rt = Runtime::new();
                let mut model = initial.clone();
                let vec = ReactiveVec::from_values(
                    &rt,
                    initial.iter().map(|v| Value::Int(*v)).collect(),
                );
                let all_even = vec.live_every(is_even);
                let any_even = vec.live_some(is_even);
                let idx_of_3 = vec.live_index_of(Value::Int(3));
                let last_of_3 = vec.live_last_index_of(Value::Int(3));
                let sum = vec.live_reduce(Value::Int(0), |acc, v| {
                    Value::Int(acc.as_int().unwrap_or(0) + v.as_int().unwrap_or(0))
                });
                for op in &ops {
                    apply_op(&vec, &mut model, op);
                    prop_assert_eq!(
                        all_even.get(),
                        Value::Bool(model.iter().all(|v| v % 2 == 0))
                    );
                    prop_assert_eq!(
                        any_even.get(),
                        Value::Bool(model.iter().any(|v| v % 2 == 0))
                    );
                    prop_assert_eq!(
                        idx_of_3.get(),
                        Value::Int(model.iter().position(|v| *v == 3).map(|i| i as i64).unwrap_or(-1))
                    );
                    prop_assert_eq!(
                        last_of_3.get(),
                        Value::Int(model.iter().rposition(|v| *v == 3).map(|i| i as i64).unwrap_or(-1))
                    );
                    prop_assert_eq!(sum.get(), Value::Int(model.iter().sum::<i64>()));
                }
            }
        }
    }
}
