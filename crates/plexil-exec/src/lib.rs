//! # plexil-exec
//!
//! The expression graph, node state machine, lookup bridge and macro-step
//! exec driver of the PLEXIL execution kernel.
//!
//! This crate has no notion of wire formats, IPC transports or a plan
//! document's concrete syntax (those live outside the kernel, per §1/§6) —
//! it only knows the in-memory representation [`plan::PlanBuilder`]
//! produces and [`driver::Driver`] runs.
//!
//! ## Layout
//!
//! - [`expr`] — the activation-counted expression graph ([`expr::ExprArena`]).
//! - [`lookup`] — [`lookup::LookupTable`], the bridge from a graph-level
//!   `Lookup`/`LookupOnChange` expression to `plexil_cache::StateCache`.
//! - [`node`] — the node model ([`node::NodeArena`], [`node::NodeData`]) and
//!   state machine ([`node::evaluate`]).
//! - [`driver`] — [`driver::Driver`], the macro-step algorithm (§4.H).
//! - [`plan`] — [`plan::PlanBuilder`], which assembles the three arenas
//!   above into a runnable `Driver`.
//! - [`config`] — [`config::ExecConfig`], the driver's own tunables.
//! - [`error`] — [`error::ExecError`], this crate's error taxonomy (§7).

pub mod config;
pub mod driver;
pub mod error;
pub mod expr;
pub mod lookup;
pub mod node;
pub mod plan;

pub use config::ExecConfig;
pub use driver::Driver;
pub use error::{ExecError, Result};
pub use plan::{BuiltExpr, PlanBuilder};
