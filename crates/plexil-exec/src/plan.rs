//! A programmatic plan builder: ties [`crate::node::NodeArena`],
//! [`crate::expr::ExprArena`] and [`crate::lookup::LookupTable`] together
//! into a [`crate::driver::Driver`].
//!
//! Parsing a PLEXIL document into this representation is out of scope
//! (§1) — this module is the target a parser (or, as in the test suite, a
//! hand-written plan) builds against.

use std::collections::HashMap;

use plexil_cache::{Dispatcher, StateCache};
use plexil_value::{Value, ValueType};

use crate::config::ExecConfig;
use crate::driver::Driver;
use crate::error::{ExecError, Result};
use crate::expr::{ExprArena, ExprId, NullSink, Operator};
use crate::lookup::LookupTable;
use crate::node::{
    AssignmentRecord, CommandRecord, ConditionRole, NodeArena, NodeBody, NodeData, NodeId, NodeType, UpdateRecord,
};

/// An expression handle paired with the lookups reachable from it, so a
/// condition built out of several sub-expressions knows — without walking
/// the arena — which lookups to activate alongside it.
#[derive(Debug, Clone)]
pub struct BuiltExpr {
    pub id: ExprId,
    lookups: Vec<ExprId>,
}

impl BuiltExpr {
    fn leaf(id: ExprId) -> Self {
        BuiltExpr { id, lookups: Vec::new() }
    }
}

pub struct PlanBuilder {
    nodes: NodeArena,
    exprs: ExprArena,
    lookups: LookupTable,
    lookup_deps: Vec<(ExprId, Vec<ExprId>)>,
    libraries: HashMap<String, NodeId>,
    doc_counter: u64,
    /// (formal's variable `ExprId`, actual `BuiltExpr`) pairs queued by
    /// [`Self::library_call`], resolved in [`Self::build`] once a
    /// dispatcher exists to materialize any `Lookup`-backed actual.
    pending_aliases: Vec<(ExprId, BuiltExpr)>,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        PlanBuilder::new()
    }
}

impl PlanBuilder {
    pub fn new() -> Self {
        PlanBuilder {
            nodes: NodeArena::new(),
            exprs: ExprArena::new(),
            lookups: LookupTable::new(),
            lookup_deps: Vec::new(),
            libraries: HashMap::new(),
            doc_counter: 0,
            pending_aliases: Vec::new(),
        }
    }

    fn next_doc_order(&mut self) -> u64 {
        let d = self.doc_counter;
        self.doc_counter += 1;
        d
    }

    pub fn exprs_mut(&mut self) -> &mut ExprArena {
        &mut self.exprs
    }

    // ---- expression construction ---------------------------------------

    pub fn constant(&mut self, value: Value) -> BuiltExpr {
        BuiltExpr::leaf(self.exprs.constant(value))
    }

    pub fn variable(&mut self, ty: ValueType, initial: Value) -> BuiltExpr {
        BuiltExpr::leaf(self.exprs.variable(ty, initial))
    }

    pub fn op(&mut self, op: Operator, args: Vec<BuiltExpr>, result_type: ValueType) -> Result<BuiltExpr> {
        let mut lookups = Vec::new();
        let ids = args
            .into_iter()
            .map(|a| {
                lookups.extend(a.lookups);
                a.id
            })
            .collect();
        let id = self.exprs.operator(op, ids, result_type)?;
        Ok(BuiltExpr { id, lookups })
    }

    pub fn lookup(&mut self, name: BuiltExpr, params: Vec<BuiltExpr>, ty: ValueType) -> BuiltExpr {
        let id = self.exprs.external_source(ty);
        let mut lookups = name.lookups.clone();
        let param_ids: Vec<ExprId> = params
            .iter()
            .map(|p| {
                lookups.extend(p.lookups.clone());
                p.id
            })
            .collect();
        self.lookups.add_lookup(&mut self.exprs, id, name.id, param_ids, ty);
        lookups.push(id);
        BuiltExpr { id, lookups }
    }

    pub fn lookup_on_change(&mut self, name: BuiltExpr, params: Vec<BuiltExpr>, ty: ValueType, tolerance: BuiltExpr) -> BuiltExpr {
        let id = self.exprs.external_source(ty);
        let mut lookups = name.lookups.clone();
        let param_ids: Vec<ExprId> = params
            .iter()
            .map(|p| {
                lookups.extend(p.lookups.clone());
                p.id
            })
            .collect();
        lookups.extend(tolerance.lookups.clone());
        self.lookups.add_lookup_on_change(&mut self.exprs, id, name.id, param_ids, ty, tolerance.id);
        lookups.push(id);
        BuiltExpr { id, lookups }
    }

    /// The always-true/always-false constant a condition role falls back to
    /// when the plan author leaves it unspecified. The termination-gating
    /// roles (`SkipCondition`, `ExitCondition`, `AncestorExitCondition`) and
    /// `RepeatCondition` default to `false` — an unset skip/exit must never
    /// fire, and an unset repeat must not loop forever. Every other role
    /// (Start/Pre/Post/End/Invariant/AncestorInvariant/AncestorEnd) defaults
    /// to `true`, since those gate forward progress rather than termination.
    pub fn default_condition(&mut self, role: ConditionRole) -> BuiltExpr {
        let value = !matches!(
            role,
            ConditionRole::RepeatCondition
                | ConditionRole::SkipCondition
                | ConditionRole::ExitCondition
                | ConditionRole::AncestorExitCondition
        );
        self.constant(Value::Boolean(value))
    }

    // ---- node construction ------------------------------------------------

    pub fn next_node_id(&self) -> NodeId {
        self.nodes.next_id()
    }

    /// Inserts `node`, filling any of the 14 condition roles the caller
    /// left unset with their default, synthesizing the three externally-
    /// driven roles (`ActionComplete`, `AbortComplete`,
    /// `CommandHandleReceived`) that the driver writes to directly, wiring
    /// each child's `parent` back-pointer, and registering every supplied
    /// condition's lookup dependencies for the driver to pick up via
    /// [`Self::drain_lookup_deps`].
    pub fn node(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        node_type: NodeType,
        priority: i64,
        children: Vec<NodeId>,
        mut conditions: HashMap<ConditionRole, BuiltExpr>,
        variables: HashMap<String, ExprId>,
        body: NodeBody,
    ) -> Result<NodeId> {
        if id != self.nodes.next_id() {
            return Err(ExecError::plan("node id must equal the builder's next id; reserve it with next_node_id() first"));
        }
        let doc_order = self.next_doc_order();

        for role in [ConditionRole::ActionComplete, ConditionRole::AbortComplete, ConditionRole::CommandHandleReceived] {
            conditions.entry(role).or_insert_with(|| {
                let expr = self.exprs.external_source(ValueType::Boolean);
                BuiltExpr::leaf(expr)
            });
        }
        for &role in ConditionRole::ALL.iter() {
            if !conditions.contains_key(&role) {
                let built = self.default_condition(role);
                conditions.insert(role, built);
            }
        }

        let mut array: [Option<ExprId>; 14] = [None; 14];
        for (role, built) in conditions {
            if !built.lookups.is_empty() {
                self.lookup_deps.push((built.id, built.lookups));
            }
            array[role.index() as usize] = Some(built.id);
        }

        let data = NodeData {
            id,
            name: name.into(),
            node_type,
            parent: None,
            children: children.clone(),
            priority,
            doc_order,
            state: plexil_value::NodeState::Inactive,
            outcome: None,
            failure_type: None,
            conditions: array,
            variables,
            body,
        };
        let inserted = self.nodes.insert(data);
        for child in children {
            self.nodes.get_mut(child).parent = Some(inserted);
        }
        Ok(inserted)
    }

    fn remember_deps(&mut self, built: &BuiltExpr) {
        if !built.lookups.is_empty() {
            self.lookup_deps.push((built.id, built.lookups.clone()));
        }
    }

    pub fn assignment_body(&mut self, target: ExprId, rhs: BuiltExpr) -> NodeBody {
        self.remember_deps(&rhs);
        NodeBody::Assignment(AssignmentRecord { target, rhs: rhs.id })
    }

    pub fn command_body(&mut self, name: BuiltExpr, args: Vec<BuiltExpr>, resource_priority: i64) -> NodeBody {
        self.remember_deps(&name);
        let arg_ids = args
            .into_iter()
            .map(|a| {
                self.remember_deps(&a);
                a.id
            })
            .collect();
        NodeBody::Command(CommandRecord::new(name.id, arg_ids, resource_priority))
    }

    pub fn update_body(&mut self, pairs: Vec<(String, BuiltExpr)>) -> NodeBody {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| {
                self.remember_deps(&v);
                (k, v.id)
            })
            .collect();
        NodeBody::Update(UpdateRecord { pairs, update_id: None, acknowledged: false })
    }

    /// Registers `node` under `name` so later [`Self::library_call`]s can
    /// find it. Since a library can only be called after it is registered,
    /// and registration only happens once a library's own subtree
    /// (including any library calls *it* makes) is fully built, a library
    /// can never transitively call itself — circular references are
    /// rejected structurally rather than by a separate graph search.
    pub fn register_library(&mut self, name: impl Into<String>, node: NodeId) {
        self.libraries.insert(name.into(), node);
    }

    /// Records that `aliases` (formal parameter name → actual expression)
    /// should be bound into `library`'s declared variables by snapshotting
    /// each actual expression's current value into the corresponding
    /// formal variable. The snapshot itself happens in [`Self::build`],
    /// not here — an `actual` backed by a `Lookup` isn't materialized
    /// until its cache registration runs, which needs the dispatcher
    /// `build` is given, not yet available at call time.
    ///
    /// This is a narrower contract than full PLEXIL alias semantics, which
    /// make the formal a live reference to the actual expression: that
    /// would need either per-call-site cloning of the library's whole
    /// subtree or an indirection `ExprKind`, neither of which this kernel
    /// implements. A library instantiated once per plan and called once
    /// behaves identically either way; see `DESIGN.md`.
    pub fn library_call(&mut self, library: NodeId, aliases: HashMap<String, BuiltExpr>) -> Result<()> {
        for (formal, actual) in aliases {
            let target = *self
                .nodes
                .get(library)
                .variables
                .get(&formal)
                .ok_or_else(|| ExecError::plan(format!("library has no formal parameter named '{formal}'")))?;
            self.pending_aliases.push((target, actual));
        }
        Ok(())
    }

    /// Finalizes the plan into a runnable [`Driver`]. `dispatcher` is the
    /// sole window onto the outside world (§4.I); `cache_config` governs
    /// the state cache's epsilon and staleness policy.
    pub fn build(mut self, dispatcher: Box<dyn Dispatcher>, config: ExecConfig) -> Result<Driver> {
        if self.nodes.is_empty() {
            return Err(ExecError::plan("a plan must have at least one node"));
        }

        let mut cache = StateCache::new();
        let mut sink = NullSink;
        for (target, actual) in std::mem::take(&mut self.pending_aliases) {
            self.exprs.activate(actual.id);
            for &lk in &actual.lookups {
                self.lookups.activate(lk, &mut self.exprs, &mut cache, dispatcher.as_ref(), 0, &mut sink);
            }
            let value = self.exprs.get_value(actual.id);
            self.exprs.set_variable(target, value, &mut sink)?;
            for &lk in &actual.lookups {
                self.lookups.deactivate(lk, &mut self.exprs, &mut cache, dispatcher.as_ref());
            }
            self.exprs.deactivate(actual.id);
        }

        let mut driver = Driver::new(self.nodes, self.exprs, self.lookups, cache, dispatcher, config);
        for (root, deps) in self.lookup_deps {
            driver.register_lookup_deps(root, deps);
        }
        driver.start()?;
        Ok(driver)
    }
}
