//! Positional diff between two value slices.
//!
//! The scan walks both slices from the front. The first index where they
//! disagree opens a "changed run"; the run closes at the next index where
//! they agree again. A trailing run absorbs any leftover length difference.
//! When the old slice is shorter, the scan runs with the arguments swapped
//! and the recorded old/new roles inverted.
//!
//! Two properties the patching layer relies on:
//! - runs are emitted in ascending index order, and
//! - every run except possibly the trailing one has equal old/new lengths,
//!   so applying runs in order as replace-in-place splices reproduces the
//!   new state exactly while leaving untouched slots alone.

use crate::types::Value;

/// One contiguous changed region.
#[derive(Clone, Debug, PartialEq)]
pub struct DiffRun {
    /// Index where the run starts.
    pub index: usize,
    /// The old contiguous sub-run at that index.
    pub old: Vec<Value>,
    /// The new contiguous sub-run replacing it.
    pub new: Vec<Value>,
}

/// Diff `old` against `new` positionally.
pub fn diff(old: &[Value], new: &[Value]) -> Vec<DiffRun> {
    if old.len() < new.len() {
        // Run the scan with the longer slice first, then invert the roles.
        let mut runs = diff(new, old);
        for run in &mut runs {
            std::mem::swap(&mut run.old, &mut run.new);
        }
        return runs;
    }

    let mut runs: Vec<DiffRun> = Vec::new();
    let mut open: Option<usize> = None;
    for i in 0..new.len() {
        if old[i] != new[i] {
            match open.and_then(|_| runs.last_mut()) {
                Some(run) => {
                    run.old.push(old[i].clone());
                    run.new.push(new[i].clone());
                }
                None => {
                    open = Some(i);
                    runs.push(DiffRun {
                        index: i,
                        old: vec![old[i].clone()],
                        new: vec![new[i].clone()],
                    });
                }
            }
        } else {
            open = None;
        }
    }

    // Leftover tail of the longer slice.
    if old.len() > new.len() {
        let tail: Vec<Value> = old[new.len()..].to_vec();
        match open.and_then(|_| runs.last_mut()) {
            Some(run) if run.index + run.old.len() == new.len() => {
                run.old.extend(tail);
            }
            _ => runs.push(DiffRun {
                index: new.len(),
                old: tail,
                new: Vec::new(),
            }),
        }
    }

    runs
}

/// Apply runs (in order) to `base` as replace-in-place splices.
pub fn apply(base: &mut Vec<Value>, runs: &[DiffRun]) {
    for run in runs {
        let end = (run.index + run.old.len()).min(base.len());
        base.splice(run.index..end, run.new.iter().cloned());
    }
}
