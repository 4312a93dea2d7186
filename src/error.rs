//! Error types for the dataflow runtime.
//!
//! Two layers:
//! - [`EvalError`] - a failure raised by user-supplied code (a listener, a
//!   transform, a computed-field function). These follow the queue error
//!   policy: routed to the configured handler, or surfaced from the drain.
//! - [`Error`] - the crate error type. Covers evaluation errors plus
//!   scheduling-discipline errors, which are always returned synchronously
//!   to the caller and never deferred.

use thiserror::Error;

/// Failure raised by a user-supplied function.
///
/// Carries a message only; the runtime treats these as opaque. Evaluation
/// errors are local to the listener invocation that raised them - when a
/// queue error handler is configured, sibling listeners in the same pass
/// still run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EvalError(pub String);

impl EvalError {
    /// Create an evaluation error from any displayable message.
    pub fn new(msg: impl Into<String>) -> Self {
        EvalError(msg.into())
    }
}

/// Errors produced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A deferred action was pushed while no flow run was active.
    #[error("not in a running flow")]
    NotRunning,

    /// A field was registered under a name claimed by the registry layer.
    #[error("field name `{0}` is reserved")]
    ReservedField(String),

    /// A size-bounded buffered stream was constructed with size zero.
    #[error("buffered stream requires a non-zero size")]
    InvalidBufferSize,

    /// An index-addressed operation fell outside the collection.
    #[error("index {index} out of bounds (len {len})")]
    OutOfBounds { index: usize, len: usize },

    /// A user-supplied function failed during evaluation.
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl From<Error> for EvalError {
    fn from(err: Error) -> Self {
        match err {
            Error::Eval(e) => e,
            other => EvalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_error_display() {
        let e = EvalError::new("boom");
        assert_eq!(e.to_string(), "boom");
    }

    #[test]
    fn test_error_round_trip_through_eval() {
        let e: Error = EvalError::new("inner").into();
        let back: EvalError = e.into();
        assert_eq!(back, EvalError::new("inner"));
    }

    #[test]
    fn test_discipline_error_to_eval_keeps_message() {
        let e: EvalError = Error::NotRunning.into();
        assert_eq!(e.to_string(), "not in a running flow");
    }
}
