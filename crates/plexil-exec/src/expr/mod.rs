//! The expression graph (§4.B): an activation-counted DAG of typed
//! expressions that lazily recomputes and notifies exactly the consumers
//! that need to react.
//!
//! Per the redesign note in spec §9 ("cyclic parent/child pointers... map
//! onto an arena of nodes indexed by a typed handle"), the graph lives in
//! one [`ExprArena`] indexed by [`ExprId`] rather than as a web of `Rc`s —
//! an `Operator` expression holds the `ExprId`s of its arguments, never a
//! pointer back to them.

mod operator;

pub use operator::Operator;

use std::collections::HashMap;

use plexil_value::{Value, ValueType};

use crate::error::{ExecError, Result};

/// A handle into an [`ExprArena`]. Cheap to copy, stable for the lifetime
/// of the plan (the arena never recycles indices within one `Plan`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) usize);

/// An opaque handle minted by a caller outside this module (the exec
/// driver, for a node's condition, or the lookup subsystem, for a lookup's
/// name/parameter/tolerance inputs) and registered as a listener via
/// [`Listener::External`]. The arena never interprets the token — it only
/// hands it back to an [`ExternalListenerSink`] when the expression it's
/// attached to changes. This is what keeps `plexil-exec::expr` ignorant of
/// both the node arena and the lookup/state-cache subsystem, per §9's
/// "replace factory-registry singletons with a trait" guidance generalized
/// to listener identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(pub u64);

/// One entry on an expression's outgoing listener list: either another
/// expression (the common case — an operator listening to its frontier) or
/// an external token resolved by whoever minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listener {
    Expr(ExprId),
    External(ListenerToken),
}

/// Receives a callback whenever an expression carrying one of its tokens as
/// a [`Listener::External`] changes. Implemented by the exec driver (to
/// re-enqueue a node whose condition changed) and by the lookup subsystem
/// (to re-materialize a `Lookup` whose name/parameter/tolerance input
/// changed).
pub trait ExternalListenerSink {
    fn notify_external(&mut self, token: ListenerToken);
}

/// A sink that drops every notification. Useful for plan-construction code
/// that sets an initial constant value before anything could possibly be
/// listening.
pub struct NullSink;
impl ExternalListenerSink for NullSink {
    fn notify_external(&mut self, _token: ListenerToken) {}
}

/// The kind of value an [`ExprNode`] computes. `Constant`, `Variable` and
/// `ExternalSource` are leaves; `Operator` is the only internal (derived)
/// kind. `Variable` and `ExternalSource` are propagation sources per §3 —
/// their value can change without any subexpression changing. `Constant`
/// never changes and is therefore not a source despite having no
/// subexpressions either.
#[derive(Debug, Clone)]
enum ExprKind {
    Constant(Value),
    /// An assignable cell — the target of an `Assignment` node's rhs, and
    /// the backing store for a node's declared variables.
    Variable(Value),
    /// A value pushed in from outside the graph by something that isn't
    /// itself an expression: a `Lookup`'s cache-backed value, or a
    /// `NodeStateRef` driven by the node state machine. The graph treats
    /// both identically — a leaf source whose current value is set by
    /// `ExprArena::set_external`.
    ExternalSource(Value),
    Operator(Operator, Vec<ExprId>),
}

struct ExprNode {
    kind: ExprKind,
    value_type: ValueType,
    active_count: u32,
    listeners: Vec<Listener>,
    /// The source descendants this expression has installed itself as a
    /// listener on, per the frontier-wiring contract — populated only
    /// while `listeners` is non-empty, torn down when it empties.
    installed_frontier: Vec<ExprId>,
}

impl ExprNode {
    fn is_source(&self) -> bool {
        matches!(self.kind, ExprKind::Variable(_) | ExprKind::ExternalSource(_))
    }

    fn subexpressions(&self) -> &[ExprId] {
        match &self.kind {
            ExprKind::Operator(_, args) => args,
            _ => &[],
        }
    }
}

/// Owns every expression in a plan. `Operator` nodes hold `ExprId`s of
/// their arguments rather than pointers, so the arena as a whole can be
/// freed in one shot when the plan is torn down — no reference cycles to
/// untangle.
#[derive(Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
}

impl ExprArena {
    pub fn new() -> Self {
        ExprArena { nodes: Vec::new() }
    }

    fn push(&mut self, kind: ExprKind, value_type: ValueType) -> ExprId {
        let id = ExprId(self.nodes.len());
        self.nodes.push(ExprNode {
            kind,
            value_type,
            active_count: 0,
            listeners: Vec::new(),
            installed_frontier: Vec::new(),
        });
        id
    }

    pub fn constant(&mut self, value: Value) -> ExprId {
        let ty = value.value_type();
        self.push(ExprKind::Constant(value), ty)
    }

    pub fn variable(&mut self, ty: ValueType, initial: Value) -> ExprId {
        self.push(ExprKind::Variable(initial), ty)
    }

    /// A leaf whose value is written from outside the graph (a `Lookup` or
    /// a `NodeStateRef`); starts `Unknown`.
    pub fn external_source(&mut self, ty: ValueType) -> ExprId {
        self.push(ExprKind::ExternalSource(Value::unknown(ty)), ty)
    }

    pub fn operator(&mut self, op: Operator, args: Vec<ExprId>, result_type: ValueType) -> Result<ExprId> {
        for &a in &args {
            if a.0 >= self.nodes.len() {
                return Err(ExecError::plan("operator argument references an unknown expression"));
            }
        }
        Ok(self.push(ExprKind::Operator(op, args), result_type))
    }

    pub fn value_type(&self, id: ExprId) -> ValueType {
        self.nodes[id.0].value_type
    }

    pub fn is_active(&self, id: ExprId) -> bool {
        self.nodes[id.0].active_count > 0
    }

    /// Returns `Unknown` for an inactive expression, per §4.B: "while
    /// inactive, an expression... returns Unknown."
    pub fn get_value(&self, id: ExprId) -> Value {
        let node = &self.nodes[id.0];
        if node.active_count == 0 {
            return Value::unknown(node.value_type);
        }
        match &node.kind {
            ExprKind::Constant(v) | ExprKind::Variable(v) | ExprKind::ExternalSource(v) => v.clone(),
            ExprKind::Operator(op, args) => {
                let values: Vec<Value> = args.iter().map(|a| self.get_value(*a)).collect();
                op.eval(&values, node.value_type)
            }
        }
    }

    /// Reference-counted activation (§4.B). The first activation also
    /// activates every subexpression; `Constant`/`Variable`/
    /// `ExternalSource` are base cases with nothing further to activate.
    pub fn activate(&mut self, id: ExprId) {
        let first = {
            let node = &mut self.nodes[id.0];
            node.active_count += 1;
            node.active_count == 1
        };
        if first {
            let children: Vec<ExprId> = self.nodes[id.0].subexpressions().to_vec();
            for child in children {
                self.activate(child);
            }
        }
    }

    /// Mirror of [`Self::activate`]. Saturates at zero rather than
    /// underflowing if called more times than `activate` — a defect
    /// elsewhere, but not one this method should panic over.
    pub fn deactivate(&mut self, id: ExprId) {
        let last = {
            let node = &mut self.nodes[id.0];
            if node.active_count == 0 {
                return;
            }
            node.active_count -= 1;
            node.active_count == 0
        };
        if last {
            let children: Vec<ExprId> = self.nodes[id.0].subexpressions().to_vec();
            for child in children {
                self.deactivate(child);
            }
        }
    }

    /// Frontier wiring (§4.B): `addListener(L)` on `id` walks `id`'s
    /// subexpressions, installing `id` itself as a listener on every
    /// propagation-source descendant (recursing through non-source
    /// descendants), then appends `L` to `id`'s own listener list.
    /// Installation only happens once, on the transition from zero to one
    /// listeners — the frontier is shared by every subsequent listener.
    pub fn add_listener(&mut self, id: ExprId, listener: Listener) {
        let had_listeners = !self.nodes[id.0].listeners.is_empty();
        if !had_listeners {
            self.install_frontier(id);
        }
        let listeners = &mut self.nodes[id.0].listeners;
        if !listeners.contains(&listener) {
            listeners.push(listener);
        }
    }

    /// Mirror of [`Self::add_listener`]: removes `L`; if `id` then has no
    /// listeners left, tears down the installed frontier.
    pub fn remove_listener(&mut self, id: ExprId, listener: Listener) {
        self.nodes[id.0].listeners.retain(|l| *l != listener);
        if self.nodes[id.0].listeners.is_empty() {
            self.teardown_frontier(id);
        }
    }

    fn install_frontier(&mut self, id: ExprId) {
        let mut frontier = Vec::new();
        self.collect_source_frontier(id, &mut frontier);
        for &src in &frontier {
            let listeners = &mut self.nodes[src.0].listeners;
            let l = Listener::Expr(id);
            if !listeners.contains(&l) {
                listeners.push(l);
            }
        }
        self.nodes[id.0].installed_frontier = frontier;
    }

    fn teardown_frontier(&mut self, id: ExprId) {
        let frontier = std::mem::take(&mut self.nodes[id.0].installed_frontier);
        for src in frontier {
            self.nodes[src.0].listeners.retain(|l| *l != Listener::Expr(id));
        }
    }

    fn collect_source_frontier(&self, id: ExprId, out: &mut Vec<ExprId>) {
        for &child in self.nodes[id.0].subexpressions() {
            if self.nodes[child.0].is_source() {
                if !out.contains(&child) {
                    out.push(child);
                }
            } else {
                self.collect_source_frontier(child, out);
            }
        }
    }

    /// Writes a new value to a `Variable` leaf (an `Assignment` node's
    /// target). Publishes to listeners only if the value actually changed
    /// and the variable is active, per the no-op-while-inactive rule.
    pub fn set_variable(&mut self, id: ExprId, value: Value, sink: &mut dyn ExternalListenerSink) -> Result<()> {
        match &mut self.nodes[id.0].kind {
            ExprKind::Variable(_) => {}
            _ => return Err(ExecError::assertion("set_variable called on a non-Variable expression")),
        }
        self.write_source(id, value, sink);
        Ok(())
    }

    /// Writes a new value to an `ExternalSource` leaf — the mechanism the
    /// lookup subsystem and the node state machine use to push cache
    /// updates and `NodeState` changes into the graph.
    pub fn set_external(&mut self, id: ExprId, value: Value, sink: &mut dyn ExternalListenerSink) {
        self.write_source(id, value, sink);
    }

    fn write_source(&mut self, id: ExprId, value: Value, sink: &mut dyn ExternalListenerSink) {
        let changed = match &self.nodes[id.0].kind {
            ExprKind::Variable(v) | ExprKind::ExternalSource(v) => *v != value,
            _ => false,
        };
        match &mut self.nodes[id.0].kind {
            ExprKind::Variable(v) | ExprKind::ExternalSource(v) => *v = value,
            _ => {}
        }
        if changed {
            self.publish_change(id, sink);
        }
    }

    /// Invokes `notifyChanged` on every outgoing listener of `id`, in
    /// insertion order, per §4.B's propagation contract. `Listener::Expr`
    /// recurses (an `Operator` re-publishes unconditionally to its own
    /// listeners, since it holds no cached value to compare against — it
    /// simply forwards "something you depend on changed"); `Listener::
    /// External` calls out to the sink. A no-op while `id` is inactive.
    pub fn publish_change(&mut self, id: ExprId, sink: &mut dyn ExternalListenerSink) {
        if self.nodes[id.0].active_count == 0 {
            return;
        }
        let listeners = self.nodes[id.0].listeners.clone();
        for listener in listeners {
            match listener {
                Listener::Expr(other) => self.publish_change(other, sink),
                Listener::External(token) => sink.notify_external(token),
            }
        }
    }

    #[cfg(test)]
    fn listener_count(&self, id: ExprId) -> usize {
        self.nodes[id.0].listeners.len()
    }
}

/// Maps a node id and condition role to a [`ListenerToken`] and back,
/// without `plexil-exec::expr` needing to know what a node or a condition
/// role is. A thin bijection: `(node_index << 8) | role_index`.
#[derive(Default)]
pub struct TokenTable {
    next_ad_hoc: u64,
    labels: HashMap<ListenerToken, String>,
}

impl TokenTable {
    pub fn new() -> Self {
        TokenTable::default()
    }

    pub fn encode(node_index: usize, role_index: u8) -> ListenerToken {
        ListenerToken(((node_index as u64) << 8) | role_index as u64)
    }

    pub fn decode(token: ListenerToken) -> (usize, u8) {
        ((token.0 >> 8) as usize, (token.0 & 0xff) as u8)
    }

    /// Mints a token for a non-node consumer (the lookup subsystem), kept
    /// distinct from node tokens by setting a high bit no real node index
    /// will ever reach.
    pub fn fresh(&mut self, label: impl Into<String>) -> ListenerToken {
        let token = ListenerToken((1 << 48) | self.next_ad_hoc);
        self.next_ad_hoc += 1;
        self.labels.insert(token, label.into());
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink(Vec<ListenerToken>);
    impl ExternalListenerSink for RecordingSink {
        fn notify_external(&mut self, token: ListenerToken) {
            self.0.push(token);
        }
    }

    #[test]
    fn inactive_expression_reads_as_unknown() {
        let mut arena = ExprArena::new();
        let c = arena.variable(ValueType::Integer, Value::Integer(1));
        assert!(!arena.get_value(c).is_known());
    }

    #[test]
    fn activation_is_reference_counted() {
        let mut arena = ExprArena::new();
        let v = arena.variable(ValueType::Integer, Value::Integer(5));
        arena.activate(v);
        arena.activate(v);
        arena.deactivate(v);
        assert!(arena.is_active(v));
        arena.deactivate(v);
        assert!(!arena.is_active(v));
    }

    #[test]
    fn operator_recomputes_from_live_subexpression_values() {
        let mut arena = ExprArena::new();
        let x = arena.variable(ValueType::Integer, Value::Integer(1));
        let y = arena.variable(ValueType::Integer, Value::Integer(2));
        let sum = arena.operator(Operator::Add, vec![x, y], ValueType::Integer).unwrap();
        arena.activate(sum);
        assert_eq!(arena.get_value(sum), Value::Integer(3));
        let mut sink = RecordingSink(Vec::new());
        arena.set_variable(x, Value::Integer(10), &mut sink).unwrap();
        assert_eq!(arena.get_value(sum), Value::Integer(12));
    }

    #[test]
    fn listener_added_only_on_source_frontier_not_intermediate_operators() {
        let mut arena = ExprArena::new();
        let x = arena.variable(ValueType::Boolean, Value::Boolean(true));
        let not_x = arena.operator(Operator::Not, vec![x], ValueType::Boolean).unwrap();
        let not_not_x = arena.operator(Operator::Not, vec![not_x], ValueType::Boolean).unwrap();
        arena.activate(not_not_x);
        arena.add_listener(not_not_x, Listener::External(ListenerToken(1)));
        // not_not_x listens directly on x (the source), skipping the
        // intermediate not_x, and not_x itself has no listeners installed.
        assert_eq!(arena.listener_count(x), 1);
        assert_eq!(arena.listener_count(not_x), 0);
    }

    #[test]
    fn removing_last_listener_tears_down_the_frontier() {
        let mut arena = ExprArena::new();
        let x = arena.variable(ValueType::Boolean, Value::Boolean(true));
        let not_x = arena.operator(Operator::Not, vec![x], ValueType::Boolean).unwrap();
        arena.activate(not_x);
        let l = Listener::External(ListenerToken(7));
        arena.add_listener(not_x, l);
        assert_eq!(arena.listener_count(x), 1);
        arena.remove_listener(not_x, l);
        assert_eq!(arena.listener_count(x), 0);
    }

    #[test]
    fn change_to_source_propagates_to_external_listener() {
        let mut arena = ExprArena::new();
        let x = arena.variable(ValueType::Boolean, Value::Boolean(false));
        let not_x = arena.operator(Operator::Not, vec![x], ValueType::Boolean).unwrap();
        arena.activate(not_x);
        let token = ListenerToken(42);
        arena.add_listener(not_x, Listener::External(token));
        let mut sink = RecordingSink(Vec::new());
        arena.set_variable(x, Value::Boolean(true), &mut sink).unwrap();
        assert_eq!(sink.0, vec![token]);
    }

    #[test]
    fn duplicate_listener_registration_is_deduplicated() {
        let mut arena = ExprArena::new();
        let x = arena.variable(ValueType::Boolean, Value::Boolean(true));
        arena.activate(x);
        let l = Listener::External(ListenerToken(1));
        arena.add_listener(x, l);
        arena.add_listener(x, l);
        assert_eq!(arena.listener_count(x), 1);
    }
}

#[cfg(test)]
mod activation_proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// §4.B: activation is reference-counted. Any number of activations
        /// followed by the same number of deactivations must leave the
        /// expression inactive, regardless of how they interleave with
        /// extra balanced activate/deactivate pairs in between.
        #[test]
        fn balanced_activation_pairs_leave_expression_inactive(n in 1u32..50, extra_pairs in 0u32..20) {
            let mut arena = ExprArena::new();
            let v = arena.variable(ValueType::Integer, Value::Integer(1));
            for _ in 0..n {
                arena.activate(v);
            }
            for _ in 0..extra_pairs {
                arena.activate(v);
                arena.deactivate(v);
            }
            prop_assert!(arena.is_active(v));
            for _ in 0..n {
                arena.deactivate(v);
            }
            prop_assert!(!arena.is_active(v));
            prop_assert!(!arena.get_value(v).is_known());
        }

        /// §4.B frontier wiring: no matter how deep a chain of unary
        /// operators sits above a single source variable, listening on the
        /// top of the chain installs exactly one listener on the source and
        /// none on any intermediate operator.
        #[test]
        fn frontier_listener_count_is_one_regardless_of_chain_depth(depth in 1usize..10) {
            let mut arena = ExprArena::new();
            let x = arena.variable(ValueType::Boolean, Value::Boolean(true));
            let mut top = x;
            let mut intermediates = Vec::new();
            for _ in 0..depth {
                top = arena.operator(Operator::Not, vec![top], ValueType::Boolean).unwrap();
                intermediates.push(top);
            }
            arena.activate(top);
            arena.add_listener(top, Listener::External(ListenerToken(1)));

            prop_assert_eq!(arena.listener_count(x), 1);
            for &mid in intermediates.iter().take(intermediates.len().saturating_sub(1)) {
                prop_assert_eq!(arena.listener_count(mid), 0);
            }

            arena.remove_listener(top, Listener::External(ListenerToken(1)));
            prop_assert_eq!(arena.listener_count(x), 0);
        }
    }
}
