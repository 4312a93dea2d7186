//! # spark-flow
//!
//! Reactive dataflow runtime for Rust.
//!
//! spark-flow turns plain data containers into nodes of a dependency graph,
//! discovers dependencies between computed values by observing which fields
//! are read during evaluation, and propagates changes through the graph in a
//! controlled, priority-ordered pass that avoids redundant or out-of-order
//! recomputation (the diamond problem).
//!
//! ## Architecture
//!
//! Propagation is pull-free and scheduled:
//! ```text
//! field write → Event → Flow queues (priority + de-dup) → listeners
//!                  │                                         │
//!                  └── cascade into dependent properties ────┘
//! ```
//!
//! - [`flow`] - the scheduler: priority-bucketed action queues, ordered
//!   queue groups with back-propagation, and the reentrant [`Flow`] with
//!   its suspension stack and pause gate.
//! - [`observe`] - the observable/event base protocol: listeners, transform
//!   pipelines, source composition.
//! - [`stream`] - push streams and their size-buffered, delayed, throttled,
//!   and debounced variants.
//! - [`object`] - tracked containers, per-field properties with dependency
//!   auto-tracking and reprobe, single reactive values.
//! - [`collections`] - reactive sequences with incrementally maintained
//!   derived views and the positional diff engine behind them.
//! - [`runtime`] - the explicit [`Runtime`]: flow, evaluation context, and
//!   the virtual clock driving timed streams.
//!
//! ## Example
//!
//! ```ignore
//! use spark_flow::{ReactiveObject, Runtime, Value};
//!
//! let rt = Runtime::new();
//! let obj = ReactiveObject::from_pairs(&rt, [
//!     ("a", Value::Int(1)),
//!     ("b", Value::Int(2)),
//! ])?;
//! obj.computed("sum", |o| {
//!     let a = o.get("a").as_int().unwrap_or(0);
//!     let b = o.get("b").as_int().unwrap_or(0);
//!     Value::Int(a + b)
//! })?;
//!
//! assert_eq!(obj.get("sum"), Value::Int(3));
//! obj.set("a", Value::Int(5))?;          // propagates through the flow
//! assert_eq!(obj.get("sum"), Value::Int(7));
//! ```

pub mod collections;
pub mod error;
pub mod flow;
pub mod object;
pub mod observe;
pub mod runtime;
pub mod stream;
pub mod types;

// Re-export commonly used items
pub use error::{Error, EvalError};
pub use types::Value;

pub use runtime::{Runtime, TimerId};

pub use flow::{Flow, FlowOptions, Queue, QueueGroup, QueueOptions};

pub use observe::{
    apply_transforms, listener, try_listener, ActionKey, Event, EventKind, Invoke, Listener,
    ListenerId, Observable, ObservableCore, ObservableExt, Transformed, TransformFn,
};

pub use stream::{
    DebouncingStream, DelayedStream, SizeBufferedStream, Stream, ThrottlingStream,
};

pub use object::{ComputeFn, Property, ReactiveObject, ReactiveVal, KEYWORD_FIELDS};

pub use collections::{
    apply, diff, Channels, DiffRun, ReactiveVec, SortCmp, VecChange,
};
