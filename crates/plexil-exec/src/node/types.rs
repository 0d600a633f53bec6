//! Node data (§3 "Node", §4.F): the per-node record the state machine and
//! exec driver operate on, and the type-specific body each node type
//! carries.

use std::collections::HashMap;

use plexil_cache::{CommandId, UpdateId};
use plexil_value::{CommandHandle, FailureType, NodeState, Outcome};

use crate::expr::ExprId;

/// A handle into a [`super::arena::NodeArena`]. Per spec §9's redesign
/// note, this replaces the original's cyclic parent/child pointers: a
/// node's parent and children are `NodeId`s, not references, so the arena
/// can be freed in one shot with the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    List,
    Assignment,
    Command,
    Update,
    Empty,
    LibraryCall,
}

/// The condition roles a node may carry (§3). Not every role applies to
/// every node type — e.g. `CommandHandleReceived` is only meaningful on a
/// `Command` node — but the set is fixed across all types so a single
/// array can hold them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionRole {
    PreCondition,
    PostCondition,
    StartCondition,
    SkipCondition,
    EndCondition,
    InvariantCondition,
    RepeatCondition,
    AncestorInvariantCondition,
    AncestorEndCondition,
    ExitCondition,
    AncestorExitCondition,
    ActionComplete,
    CommandHandleReceived,
    AbortComplete,
}

impl ConditionRole {
    pub const ALL: [ConditionRole; 14] = [
        ConditionRole::PreCondition,
        ConditionRole::PostCondition,
        ConditionRole::StartCondition,
        ConditionRole::SkipCondition,
        ConditionRole::EndCondition,
        ConditionRole::InvariantCondition,
        ConditionRole::RepeatCondition,
        ConditionRole::AncestorInvariantCondition,
        ConditionRole::AncestorEndCondition,
        ConditionRole::ExitCondition,
        ConditionRole::AncestorExitCondition,
        ConditionRole::ActionComplete,
        ConditionRole::CommandHandleReceived,
        ConditionRole::AbortComplete,
    ];

    pub fn index(self) -> u8 {
        Self::ALL.iter().position(|r| *r == self).expect("role in ALL") as u8
    }
}

/// `x := rhs`: the target variable and the expression computing its new
/// value. Not itself an expression-graph node — the driver evaluates `rhs`
/// and calls `ExprArena::set_variable(target, ...)` as the entry action for
/// `Executing`.
#[derive(Debug, Clone)]
pub struct AssignmentRecord {
    pub target: ExprId,
    pub rhs: ExprId,
}

/// Tracks a dispatched command's lifecycle far enough to drive
/// `ActionComplete`/`CommandHandleReceived`/`AbortComplete` without the
/// kernel needing to understand the command's domain meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDispatchState {
    NotStarted,
    Sent,
    HandleReceived,
    ReturnReceived,
    AbortRequested,
    AbortAcknowledged,
}

/// A `Command` node's outbound intent plus the resource-arbitration
/// bookkeeping §4.H's conflict resolution hands off to the resource
/// manager on a loss (§9 "resource arbiter hand-off detail", recovered
/// from `original_source/`).
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub name: ExprId,
    pub args: Vec<ExprId>,
    /// Smaller wins a resource conflict; matches the node's own priority
    /// unless the plan overrides it for this specific command.
    pub resource_priority: i64,
    pub resource_lower_bound: Option<f64>,
    pub resource_upper_bound: Option<f64>,
    pub return_target: Option<ExprId>,
    pub command_id: Option<CommandId>,
    pub dispatch_state: CommandDispatchState,
    pub handle: Option<CommandHandle>,
}

impl CommandRecord {
    pub fn new(name: ExprId, args: Vec<ExprId>, resource_priority: i64) -> Self {
        CommandRecord {
            name,
            args,
            resource_priority,
            resource_lower_bound: None,
            resource_upper_bound: None,
            return_target: None,
            command_id: None,
            dispatch_state: CommandDispatchState::NotStarted,
            handle: None,
        }
    }
}

/// An `Update` node's outbound intent: a batch of named values reported to
/// the planner/operator, acknowledged as a unit.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub pairs: Vec<(String, ExprId)>,
    pub update_id: Option<UpdateId>,
    pub acknowledged: bool,
}

/// The type-specific part of a node. `List`/`LibraryCall` own their
/// children (the arena frees them with the parent); `Empty` has no body at
/// all.
#[derive(Debug, Clone)]
pub enum NodeBody {
    List,
    Assignment(AssignmentRecord),
    Command(CommandRecord),
    Update(UpdateRecord),
    Empty,
    /// Delegates to `library`'s body; a `LibraryCall` node's only other
    /// child is `library` itself (§4.F). Alias binding (formal parameter
    /// name → caller expression) happens once, ahead of time, via
    /// [`crate::plan::PlanBuilder::library_call`] — it writes directly into
    /// the library's declared variables rather than being carried on this
    /// node, since a library instantiated once per plan has nowhere else a
    /// live per-call-site binding would matter.
    LibraryCall { library: NodeId },
}

/// One node in the plan. Condition roles not honored by this node's type,
/// or left unspecified by the plan author, hold a default the plan builder
/// fills in (e.g. an always-true constant for `SkipCondition`).
pub struct NodeData {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Smaller wins a tie; the root is `0` and children inherit it unless
    /// the plan overrides it.
    pub priority: i64,
    /// Document order — the tie-break below priority (§4.G), and the
    /// insertion order the pending queue respects among equal-priority
    /// nodes.
    pub doc_order: u64,
    pub state: NodeState,
    pub outcome: Option<Outcome>,
    pub failure_type: Option<FailureType>,
    pub conditions: [Option<ExprId>; 14],
    pub variables: HashMap<String, ExprId>,
    pub body: NodeBody,
}

impl NodeData {
    pub fn condition(&self, role: ConditionRole) -> Option<ExprId> {
        self.conditions[role.index() as usize]
    }

    pub fn set_condition(&mut self, role: ConditionRole, expr: ExprId) {
        self.conditions[role.index() as usize] = Some(expr);
    }
}
