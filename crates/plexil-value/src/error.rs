//! Error type for malformed values and type-system violations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlexilValueError>;

/// Errors raised while constructing or coercing [`crate::Value`]s.
///
/// These are plan errors or runtime assertions in the sense of the kernel's
/// error taxonomy: a `Value` that can't be built at all, or a coercion that
/// would silently change meaning. They never represent a plan-level failure
/// outcome (`Outcome`/`FailureType` carry those instead).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlexilValueError {
    #[error("type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { expected: crate::value::ValueType, found: crate::value::ValueType },

    #[error("array index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("cannot compare values of different types: {0:?} and {1:?}")]
    Incomparable(crate::value::ValueType, crate::value::ValueType),

    #[error("{0}")]
    Custom(String),
}
