//! The tagged [`Value`] union and the small fixed enumerations built on top
//! of it: [`NodeState`], [`Outcome`], [`FailureType`], [`CommandHandle`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{PlexilValueError, Result};

/// The scalar and array types a [`Value`] may carry, plus the bare
/// `Unknown` type used by a cache entry that has never been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Boolean,
    Integer,
    Real,
    String,
    BooleanArray,
    IntegerArray,
    RealArray,
    StringArray,
    /// No value has ever been assigned; the type itself is not yet known.
    Unknown,
}

impl ValueType {
    /// `Integer` is storable wherever `Real` is wanted; `self` is numeric.
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Real)
    }

    pub fn array_element_type(self) -> Option<ValueType> {
        match self {
            ValueType::BooleanArray => Some(ValueType::Boolean),
            ValueType::IntegerArray => Some(ValueType::Integer),
            ValueType::RealArray => Some(ValueType::Real),
            ValueType::StringArray => Some(ValueType::String),
            _ => None,
        }
    }
}

/// An immutable tagged value over PLEXIL's closed type set.
///
/// Every scalar variant has a corresponding "unknown" representation
/// (`Value::Unknown(ty)`) rather than a null bit tacked onto each variant,
/// per the type system's rule that unknown is a first-class state of every
/// type, not just a nullable wrapper around one representation. Arrays
/// carry a per-element known flag (`Vec<Option<T>>`): an array itself can
/// be known while some of its elements are not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(String),
    BooleanArray(Vec<Option<bool>>),
    IntegerArray(Vec<Option<i64>>),
    RealArray(Vec<Option<f64>>),
    StringArray(Vec<Option<String>>),
    /// Unknown value of a specific (possibly still-unknown) type.
    Unknown(ValueType),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Real(_) => ValueType::Real,
            Value::String(_) => ValueType::String,
            Value::BooleanArray(_) => ValueType::BooleanArray,
            Value::IntegerArray(_) => ValueType::IntegerArray,
            Value::RealArray(_) => ValueType::RealArray,
            Value::StringArray(_) => ValueType::StringArray,
            Value::Unknown(ty) => *ty,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Value::Unknown(_))
    }

    pub fn unknown(ty: ValueType) -> Value {
        Value::Unknown(ty)
    }

    /// Reinterpret `self` as a `Real`, widening `Integer` per the cache
    /// entry's type-compatibility rule (Integer is storable in any numeric
    /// slot). Returns `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Typed comparison; `Ordering` is only ever produced between values of
    /// the same type (or Integer vs Real, both numeric). Unknown values are
    /// never comparable.
    pub fn try_cmp(&self, other: &Value) -> Result<Ordering> {
        use Value::*;
        match (self, other) {
            (Boolean(a), Boolean(b)) => Ok(a.cmp(b)),
            (Integer(a), Integer(b)) => Ok(a.cmp(b)),
            (Real(a), Real(b)) => a
                .partial_cmp(b)
                .ok_or_else(|| PlexilValueError::Custom("NaN is not orderable".into())),
            (Integer(a), Real(b)) => (*a as f64)
                .partial_cmp(b)
                .ok_or_else(|| PlexilValueError::Custom("NaN is not orderable".into())),
            (Real(a), Integer(b)) => a
                .partial_cmp(&(*b as f64))
                .ok_or_else(|| PlexilValueError::Custom("NaN is not orderable".into())),
            (String(a), String(b)) => Ok(a.cmp(b)),
            _ => Err(PlexilValueError::Incomparable(self.value_type(), other.value_type())),
        }
    }
}

/// Typed equality: same type and contents, with `Real` compared bitwise
/// (two NaN payloads with identical bits are equal; `0.0` and `-0.0` are
/// not), matching the state cache's "value differs from the cached one"
/// test. Cross-type comparisons (including Integer vs Real) are never
/// equal — the cache's type-compatibility rule governs coercion on write,
/// not equality on read.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Real(a), Real(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (BooleanArray(a), BooleanArray(b)) => a == b,
            (IntegerArray(a), IntegerArray(b)) => a == b,
            (RealArray(a), RealArray(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| match (x, y) {
                        (Some(x), Some(y)) => x.to_bits() == y.to_bits(),
                        (None, None) => true,
                        _ => false,
                    })
            }
            (StringArray(a), StringArray(b)) => a == b,
            (Unknown(a), Unknown(b)) => a == b,
            _ => false,
        }
    }
}

/// The lifecycle phase of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Inactive,
    Waiting,
    Executing,
    IterationEnded,
    Finished,
    Failing,
    FailingIteration,
    FinishingExecution,
}

/// The categorical result recorded on a node upon reaching `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
    Skipped,
    Interrupted,
}

/// Refines `Outcome::Failure` / `Outcome::Interrupted` with the specific
/// condition that produced it. `None` when the outcome doesn't call for one
/// (e.g. `Success`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureType {
    PreconditionFailed,
    PostconditionFailed,
    InvariantConditionFailed,
    ExitConditionFailed,
    ParentFailed,
    ParentExited,
    CommandArbitrationFailure,
}

/// The lifecycle of a dispatched command's return handle, reported back to
/// the node via `CommandHandleReceived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandHandle {
    CommandSentToSystem,
    CommandAccepted,
    CommandRejected,
    CommandSuccess,
    CommandFailed,
    CommandDenied,
    CommandAborted,
    CommandAbortFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_per_type_is_not_equal_across_types() {
        assert_ne!(Value::unknown(ValueType::Integer), Value::unknown(ValueType::Real));
        assert_eq!(Value::unknown(ValueType::Integer), Value::unknown(ValueType::Integer));
    }

    #[test]
    fn real_equality_is_bitwise() {
        assert_ne!(Value::Real(0.0), Value::Real(-0.0));
        assert_eq!(Value::Real(1.5), Value::Real(1.5));
    }

    #[test]
    fn integer_widens_to_real_for_arithmetic_but_not_equality() {
        assert_eq!(Value::Integer(3).as_f64(), Some(3.0));
        assert_ne!(Value::Integer(3), Value::Real(3.0));
    }

    #[test]
    fn cross_type_comparison_errors() {
        assert!(Value::Boolean(true).try_cmp(&Value::Integer(1)).is_err());
    }

    #[test]
    fn numeric_cross_type_comparison_succeeds() {
        assert_eq!(Value::Integer(2).try_cmp(&Value::Real(3.0)).unwrap(), Ordering::Less);
    }
}
