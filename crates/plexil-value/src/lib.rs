//! Value, state and outcome types shared by the PLEXIL execution kernel.
//!
//! This crate defines the closed type system the kernel operates over: a
//! tagged [`Value`] union with a per-type "unknown" state, the [`State`]
//! identifier used to address the external world, and the small fixed
//! enumerations a node's lifecycle is expressed in ([`NodeState`],
//! [`Outcome`], [`FailureType`], [`CommandHandle`]).
//!
//! Nothing here depends on `plexil-cache` or `plexil-exec`; both depend on
//! this crate so that a `Value` constructed by the expression graph and a
//! `Value` stored in the state cache are the same type.

pub mod error;
pub mod state;
pub mod value;

pub use error::{PlexilValueError, Result};
pub use state::State;
pub use value::{CommandHandle, FailureType, NodeState, Outcome, Value, ValueType};
