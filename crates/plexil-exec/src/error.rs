//! Error taxonomy for the expression graph, node state machine and exec
//! driver (§7).
//!
//! Only three of the taxonomy's five kinds are represented as `Err` here:
//! plan errors, interface errors, and runtime assertions. Parse errors are
//! out of scope (§1, external to the kernel). Plan-level failures
//! (`PreCondition`/`Invariant`/`PostCondition`/`ParentFailed`/`Interrupted`)
//! are deliberately *not* a variant — per §7 they are "not an error, a
//! normal outcome," recorded as `Outcome`/`FailureType` on the node itself.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum ExecError {
    /// Fatal to the current plan: type mismatch in a lookup, undeclared
    /// variable, circular library reference. The plan is rejected before
    /// any node is activated.
    #[error("plan error: {0}")]
    Plan(String),

    /// Timer setup failure, adapter initialization failure. Plan startup
    /// aborts but the kernel remains usable for a new plan.
    #[error("interface error: {0}")]
    Interface(String),

    /// An invariant violated inside the kernel itself: a dangling
    /// listener, an unknown-cache-entry type mismatch surfaced from
    /// `plexil-cache`, a double activation. Fatal — the driver stops.
    #[error("runtime assertion: {0}")]
    Assertion(String),

    /// A `CacheError` surfaced through the state cache boundary; always a
    /// runtime-assertion-class failure from the exec driver's point of
    /// view (the cache itself never produces plan-level failures).
    #[error("state cache error: {0}")]
    Cache(#[from] plexil_cache::CacheError),

    #[error("value error: {0}")]
    Value(#[from] plexil_value::PlexilValueError),
}

impl ExecError {
    pub fn plan(msg: impl Into<String>) -> Self {
        ExecError::Plan(msg.into())
    }

    pub fn assertion(msg: impl Into<String>) -> Self {
        ExecError::Assertion(msg.into())
    }

    pub fn interface(msg: impl Into<String>) -> Self {
        ExecError::Interface(msg.into())
    }
}
