//! Transform pipelines.
//!
//! Each observable carries an ordered list of transforms applied to incoming
//! values before delivery. A transform either rewrites the value or
//! suppresses it, which stops propagation of that value entirely - this is
//! how `filtering` works.

use std::rc::Rc;

use crate::error::EvalError;
use crate::types::Value;

/// Outcome of one transform step.
#[derive(Clone, Debug, PartialEq)]
pub enum Transformed {
    /// Pass this value to the next transform (or deliver it).
    Value(Value),
    /// Stop propagation of this value.
    Suppressed,
}

/// A single transform step. Fallible: errors follow the queue error policy.
pub type TransformFn = Rc<dyn Fn(&Value) -> Result<Transformed, EvalError>>;

/// Run a value through a transform pipeline.
///
/// Total unless a step suppresses, in which case the remaining steps are
/// skipped and the caller must drop the value.
pub fn apply_transforms(
    transforms: &[TransformFn],
    value: Value,
) -> Result<Transformed, EvalError> {
    let mut current = value;
    for t in transforms {
        match t(&current)? {
            Transformed::Value(next) => current = next,
            Transformed::Suppressed => return Ok(Transformed::Suppressed),
        }
    }
    Ok(Transformed::Value(current))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double() -> TransformFn {
        Rc::new(|v: &Value| {
            let n = v.as_int().unwrap_or(0);
            Ok(Transformed::Value(Value::Int(n * 2)))
        })
    }

    fn drop_odd() -> TransformFn {
        Rc::new(|v: &Value| {
            if v.as_int().map(|n| n % 2 != 0).unwrap_or(false) {
                Ok(Transformed::Suppressed)
            } else {
                Ok(Transformed::Value(v.clone()))
            }
        })
    }

    #[test]
    fn test_pipeline_applies_in_order() {
        let out = apply_transforms(&[double(), double()], Value::Int(3)).unwrap();
        assert_eq!(out, Transformed::Value(Value::Int(12)));
    }

    #[test]
    fn test_suppression_short_circuits() {
        let out = apply_transforms(&[drop_odd(), double()], Value::Int(3)).unwrap();
        assert_eq!(out, Transformed::Suppressed);
    }

    #[test]
    fn test_error_propagates() {
        let failing: TransformFn = Rc::new(|_| Err(EvalError::new("nope")));
        let out = apply_transforms(&[failing], Value::Int(1));
        assert_eq!(out, Err(EvalError::new("nope")));
    }
}
