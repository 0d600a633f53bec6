//! The node model (§3 "Node", §4.F) and state machine (§4.G).

mod arena;
mod transitions;
mod types;

pub use arena::NodeArena;
pub use transitions::{evaluate, NodeTransition};
pub use types::{
    AssignmentRecord, CommandDispatchState, CommandRecord, ConditionRole, NodeBody, NodeData, NodeId, NodeType, UpdateRecord,
};
