//! The node state machine (§3 "Node state machine", §4.G): given a node's
//! current state and the live values of its conditions, decides whether a
//! transition is due this macro step.
//!
//! Every node type funnels its type-specific "is the action done" signal
//! through the same [`ConditionRole::ActionComplete`] condition — an
//! `Assignment` node's driver sets it the instant the assignment runs, a
//! `Command`/`Update` node's driver sets it when the return/acknowledge
//! arrives, an `Empty` node's driver sets it the instant `Executing` is
//! entered, and a `List`/`LibraryCall` node's driver sets it once every
//! child has reached `Finished`. That uniformity is what lets this module
//! stay ignorant of node type entirely.

use plexil_value::{FailureType, NodeState, Outcome};

use crate::expr::ExprArena;

use super::types::{ConditionRole, NodeData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTransition {
    pub to: NodeState,
    pub outcome: Option<Outcome>,
    pub failure_type: Option<FailureType>,
}

impl NodeTransition {
    fn to(state: NodeState) -> Self {
        NodeTransition { to: state, outcome: None, failure_type: None }
    }

    fn finished(outcome: Outcome, failure: Option<FailureType>) -> Self {
        NodeTransition { to: NodeState::Finished, outcome: Some(outcome), failure_type: failure }
    }
}

/// Tri-state read of a condition: `None` only for a genuinely `Unknown`
/// live value. A role the plan builder left unset falls back to its
/// default polarity — the builder is expected to have installed a default
/// constant instead, but a hand-built node (as in a unit test) shouldn't
/// behave as "wedged forever" just because it omitted, say,
/// `PostCondition`. The termination-gating roles (`SkipCondition`,
/// `ExitCondition`, `AncestorExitCondition`) and `RepeatCondition` default
/// to `false`; every other role defaults to `true` — matching
/// `PlanBuilder::default_condition`.
fn cond(node: &NodeData, role: ConditionRole, arena: &ExprArena) -> Option<bool> {
    match node.condition(role) {
        Some(id) => arena.get_value(id).as_bool(),
        None => Some(!matches!(
            role,
            ConditionRole::RepeatCondition
                | ConditionRole::SkipCondition
                | ConditionRole::ExitCondition
                | ConditionRole::AncestorExitCondition
        )),
    }
}

fn is_true(node: &NodeData, role: ConditionRole, arena: &ExprArena) -> bool {
    cond(node, role, arena) == Some(true)
}

fn is_false(node: &NodeData, role: ConditionRole, arena: &ExprArena) -> bool {
    cond(node, role, arena) == Some(false)
}

/// Checks an ancestor's propagated exit/invariant conditions, and — when
/// `check_own` is set — this node's *own* Exit/InvariantCondition too
/// (§4.G: these are only active while `Executing`, never at `Waiting`).
/// The two sources are reported with different failure types: an ancestor
/// condition produces `ParentExited`/`ParentFailed` (this node didn't fail,
/// its parent did), while the node's own condition produces
/// `ExitConditionFailed`/`InvariantConditionFailed`. Ancestor checks take
/// priority, matching the intuition that a parent's interrupt pre-empts
/// whatever this node itself was about to do.
fn interrupt(node: &NodeData, arena: &ExprArena, target: NodeState, outcome: Option<Outcome>, check_own: bool) -> Option<NodeTransition> {
    if is_true(node, ConditionRole::AncestorExitCondition, arena) {
        return Some(NodeTransition { to: target, outcome, failure_type: Some(FailureType::ParentExited) });
    }
    if check_own && is_true(node, ConditionRole::ExitCondition, arena) {
        return Some(NodeTransition { to: target, outcome, failure_type: Some(FailureType::ExitConditionFailed) });
    }
    if is_false(node, ConditionRole::AncestorInvariantCondition, arena) {
        return Some(NodeTransition { to: target, outcome, failure_type: Some(FailureType::ParentFailed) });
    }
    if check_own && is_false(node, ConditionRole::InvariantCondition, arena) {
        return Some(NodeTransition { to: target, outcome, failure_type: Some(FailureType::InvariantConditionFailed) });
    }
    None
}

/// Decides the next transition for `node`, or `None` if it should stay put
/// this macro step. The driver calls this once per dequeue from the
/// pending queue and applies the returned transition's entry/exit actions.
pub fn evaluate(node: &NodeData, arena: &ExprArena) -> Option<NodeTransition> {
    match node.state {
        NodeState::Inactive => {
            // By the time a node is eligible for evaluation at all, its
            // parent has already made it eligible to start (§4.F); the only
            // way to leave Inactive without ever running is an ancestor
            // condition that was already tripped.
            if let Some(t) = interrupt(node, arena, NodeState::Finished, Some(Outcome::Interrupted), false) {
                return Some(t);
            }
            Some(NodeTransition::to(NodeState::Waiting))
        }

        NodeState::Waiting => {
            // §4.G: only the ancestor-propagated variants are active here —
            // this node's own ExitCondition/InvariantCondition don't gate
            // until it is actually `Executing`.
            if let Some(t) = interrupt(node, arena, NodeState::Finished, Some(Outcome::Interrupted), false) {
                return Some(t);
            }
            if is_true(node, ConditionRole::SkipCondition, arena) {
                return Some(NodeTransition::finished(Outcome::Skipped, None));
            }
            if is_true(node, ConditionRole::StartCondition, arena) {
                if is_false(node, ConditionRole::PreCondition, arena) {
                    return Some(NodeTransition::finished(Outcome::Failure, Some(FailureType::PreconditionFailed)));
                }
                return Some(NodeTransition::to(NodeState::Executing));
            }
            None
        }

        NodeState::Executing => {
            if let Some(t) = interrupt(node, arena, NodeState::Failing, None, true) {
                return Some(t);
            }
            if is_true(node, ConditionRole::ActionComplete, arena) {
                if is_false(node, ConditionRole::PostCondition, arena) {
                    return Some(NodeTransition { to: NodeState::IterationEnded, outcome: Some(Outcome::Failure), failure_type: Some(FailureType::PostconditionFailed) });
                }
                // A `List`/`LibraryCall` node's driver stamps the aggregate
                // outcome derived from its children into `node.outcome`
                // before raising `ActionComplete`; any other node type
                // leaves it `None` here and gets the default `Success`.
                let outcome = node.outcome.unwrap_or(Outcome::Success);
                return Some(NodeTransition { to: NodeState::IterationEnded, outcome: Some(outcome), failure_type: None });
            }
            None
        }

        NodeState::Failing => {
            if is_true(node, ConditionRole::AbortComplete, arena) {
                Some(NodeTransition { to: NodeState::IterationEnded, outcome: Some(Outcome::Interrupted), failure_type: node.failure_type })
            } else {
                None
            }
        }

        NodeState::IterationEnded => {
            if let Some(t) = interrupt(node, arena, NodeState::FailingIteration, None, false) {
                return Some(t);
            }
            if is_true(node, ConditionRole::RepeatCondition, arena) {
                return Some(NodeTransition::to(NodeState::Waiting));
            }
            Some(NodeTransition::to(NodeState::FinishingExecution))
        }

        NodeState::FailingIteration => {
            if is_true(node, ConditionRole::AbortComplete, arena) {
                Some(NodeTransition { to: NodeState::Finished, outcome: Some(Outcome::Interrupted), failure_type: node.failure_type })
            } else {
                None
            }
        }

        NodeState::FinishingExecution => {
            if is_true(node, ConditionRole::AncestorExitCondition, arena) {
                return Some(NodeTransition::finished(Outcome::Interrupted, Some(FailureType::ParentExited)));
            }
            if is_false(node, ConditionRole::AncestorInvariantCondition, arena) {
                return Some(NodeTransition::finished(Outcome::Interrupted, Some(FailureType::ParentFailed)));
            }
            if is_true(node, ConditionRole::AncestorEndCondition, arena) || node.condition(ConditionRole::AncestorEndCondition).is_none() {
                return Some(NodeTransition { to: NodeState::Finished, outcome: node.outcome, failure_type: node.failure_type });
            }
            None
        }

        NodeState::Finished => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::types::{NodeBody, NodeId, NodeType};
    use plexil_value::{Value, ValueType};
    use std::collections::HashMap;

    fn leaf(state: NodeState) -> (ExprArena, NodeData) {
        let arena = ExprArena::new();
        let node = NodeData {
            id: NodeId(0),
            name: "n".into(),
            node_type: NodeType::Empty,
            parent: None,
            children: vec![],
            priority: 0,
            doc_order: 0,
            state,
            outcome: None,
            failure_type: None,
            conditions: [None; 14],
            variables: HashMap::new(),
            body: NodeBody::Empty,
        };
        (arena, node)
    }

    #[test]
    fn inactive_advances_to_waiting_by_default() {
        let (arena, node) = leaf(NodeState::Inactive);
        assert_eq!(evaluate(&node, &arena).unwrap().to, NodeState::Waiting);
    }

    #[test]
    fn waiting_stays_put_until_start_condition_is_true() {
        let (mut arena, mut node) = leaf(NodeState::Waiting);
        let start = arena.variable(ValueType::Boolean, Value::unknown(ValueType::Boolean));
        arena.activate(start);
        node.set_condition(ConditionRole::StartCondition, start);
        assert!(evaluate(&node, &arena).is_none());

        let mut sink = crate::expr::NullSink;
        arena.set_variable(start, Value::Boolean(true), &mut sink).unwrap();
        assert_eq!(evaluate(&node, &arena).unwrap().to, NodeState::Executing);
    }

    #[test]
    fn executing_finishes_on_action_complete() {
        let (mut arena, mut node) = leaf(NodeState::Executing);
        let done = arena.external_source(ValueType::Boolean);
        arena.activate(done);
        node.set_condition(ConditionRole::ActionComplete, done);
        assert!(evaluate(&node, &arena).is_none());

        let mut sink = crate::expr::NullSink;
        arena.set_external(done, Value::Boolean(true), &mut sink);
        let t = evaluate(&node, &arena).unwrap();
        assert_eq!(t.to, NodeState::IterationEnded);
        assert_eq!(t.outcome, Some(Outcome::Success));
    }

    #[test]
    fn false_postcondition_turns_completion_into_failure() {
        let (mut arena, mut node) = leaf(NodeState::Executing);
        let done = arena.external_source(ValueType::Boolean);
        let post = arena.constant(Value::Boolean(false));
        arena.activate(done);
        arena.activate(post);
        node.set_condition(ConditionRole::ActionComplete, done);
        node.set_condition(ConditionRole::PostCondition, post);

        let mut sink = crate::expr::NullSink;
        arena.set_external(done, Value::Boolean(true), &mut sink);
        let t = evaluate(&node, &arena).unwrap();
        assert_eq!(t.outcome, Some(Outcome::Failure));
        assert_eq!(t.failure_type, Some(FailureType::PostconditionFailed));
    }

    #[test]
    fn ancestor_invariant_failure_interrupts_execution_through_failing() {
        let (mut arena, mut node) = leaf(NodeState::Executing);
        let anc = arena.variable(ValueType::Boolean, Value::Boolean(true));
        arena.activate(anc);
        node.set_condition(ConditionRole::AncestorInvariantCondition, anc);

        let mut sink = crate::expr::NullSink;
        arena.set_variable(anc, Value::Boolean(false), &mut sink).unwrap();
        let t = evaluate(&node, &arena).unwrap();
        assert_eq!(t.to, NodeState::Failing);
        assert_eq!(t.failure_type, Some(FailureType::ParentFailed));
    }

    #[test]
    fn own_invariant_failure_is_distinguished_from_ancestor_failure() {
        let (mut arena, mut node) = leaf(NodeState::Executing);
        let inv = arena.variable(ValueType::Boolean, Value::Boolean(true));
        arena.activate(inv);
        node.set_condition(ConditionRole::InvariantCondition, inv);

        let mut sink = crate::expr::NullSink;
        arena.set_variable(inv, Value::Boolean(false), &mut sink).unwrap();
        let t = evaluate(&node, &arena).unwrap();
        assert_eq!(t.to, NodeState::Failing);
        assert_eq!(t.failure_type, Some(FailureType::InvariantConditionFailed));
    }

    #[test]
    fn own_exit_invariant_conditions_are_inactive_while_waiting() {
        let (mut arena, mut node) = leaf(NodeState::Waiting);
        let inv = arena.variable(ValueType::Boolean, Value::Boolean(false));
        let start = arena.constant(Value::Boolean(false));
        arena.activate(inv);
        arena.activate(start);
        node.set_condition(ConditionRole::InvariantCondition, inv);
        node.set_condition(ConditionRole::StartCondition, start);
        // A false InvariantCondition must not fire while merely Waiting.
        assert!(evaluate(&node, &arena).is_none());
    }

    #[test]
    fn repeat_condition_loops_back_to_waiting() {
        let (mut arena, mut node) = leaf(NodeState::IterationEnded);
        let repeat = arena.constant(Value::Boolean(true));
        arena.activate(repeat);
        node.set_condition(ConditionRole::RepeatCondition, repeat);
        assert_eq!(evaluate(&node, &arena).unwrap().to, NodeState::Waiting);
    }

    #[test]
    fn no_repeat_proceeds_to_finishing_execution_then_finished() {
        let (arena, mut node) = leaf(NodeState::IterationEnded);
        node.outcome = Some(Outcome::Success);
        assert_eq!(evaluate(&node, &arena).unwrap().to, NodeState::FinishingExecution);
        node.state = NodeState::FinishingExecution;
        let t = evaluate(&node, &arena).unwrap();
        assert_eq!(t.to, NodeState::Finished);
        assert_eq!(t.outcome, Some(Outcome::Success));
    }
}
