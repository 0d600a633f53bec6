//! The exec driver (§4.H): the macro-step algorithm. Each call to
//! [`Driver::macro_step`] drains inbound events, runs the node/expression
//! graph to quiescence, resolves assignment and resource conflicts, and
//! hands the outbound command/update queues to the [`Dispatcher`].

use std::collections::{BTreeSet, HashMap};

use plexil_cache::{
    CommandId, CommandRequest, Dispatcher, InboundEvent, StateCache, UpdateId, UpdateRequest,
};
use plexil_value::{FailureType, NodeState, Outcome, Value};
use tracing::{debug, trace};

use crate::config::ExecConfig;
use crate::error::{ExecError, Result};
use crate::expr::{ExprArena, ExprId, ExternalListenerSink, Listener, ListenerToken, TokenTable};
use crate::lookup::LookupTable;
use crate::node::{CommandDispatchState, ConditionRole, NodeArena, NodeBody, NodeId, NodeType};

/// A scratch sink that only buffers tokens; the driver decodes and acts on
/// them once the arena call that produced them has returned, rather than
/// trying to borrow `self` both as the arena's caller and as the sink.
#[derive(Default)]
struct Notifications(Vec<ListenerToken>);
impl ExternalListenerSink for Notifications {
    fn notify_external(&mut self, token: ListenerToken) {
        self.0.push(token);
    }
}

struct PendingCommand {
    node: NodeId,
    id: CommandId,
}

struct PendingUpdate {
    node: NodeId,
    id: UpdateId,
}

/// Owns the whole kernel: the node and expression arenas, the lookup
/// bridge, the state cache, and the macro-step bookkeeping. One `Driver`
/// corresponds to one running plan.
pub struct Driver {
    pub(crate) nodes: NodeArena,
    pub(crate) exprs: ExprArena,
    pub(crate) lookups: LookupTable,
    pub(crate) cache: StateCache,
    dispatcher: Box<dyn Dispatcher>,
    config: ExecConfig,
    cycle: u64,

    /// `(priority, doc_order, node index)` — ascending order matches §4.G's
    /// "lower priority value wins, document order breaks ties" rule, so the
    /// next node to evaluate is always the `BTreeSet`'s first element.
    pending: BTreeSet<(i64, u64, usize)>,

    /// Which lookups a condition's root expression depends on, so
    /// activating/deactivating the condition activates/deactivates exactly
    /// those lookups too. Populated by the plan builder.
    lookup_deps: HashMap<ExprId, Vec<ExprId>>,

    /// This macro step's not-yet-resolved assignment claims, keyed by the
    /// target variable.
    assignment_claims: HashMap<ExprId, Vec<(i64, u64, NodeId, Value)>>,
    /// This macro step's not-yet-resolved resource claims, keyed by resource
    /// name (the evaluated command name, which doubles as the resource
    /// identity per §9's resource-arbiter supplement).
    resource_claims: HashMap<String, Vec<(i64, u64, NodeId)>>,

    outbound_commands: Vec<PendingCommand>,
    outbound_updates: Vec<PendingUpdate>,
    next_command_id: u64,
    next_update_id: u64,
    command_owner: HashMap<CommandId, NodeId>,
    update_owner: HashMap<UpdateId, NodeId>,
}

impl Driver {
    pub fn new(nodes: NodeArena, exprs: ExprArena, lookups: LookupTable, cache: StateCache, dispatcher: Box<dyn Dispatcher>, config: ExecConfig) -> Self {
        Driver {
            nodes,
            exprs,
            lookups,
            cache,
            dispatcher,
            config,
            cycle: 0,
            pending: BTreeSet::new(),
            lookup_deps: HashMap::new(),
            assignment_claims: HashMap::new(),
            resource_claims: HashMap::new(),
            outbound_commands: Vec::new(),
            outbound_updates: Vec::new(),
            next_command_id: 1,
            next_update_id: 1,
            command_owner: HashMap::new(),
            update_owner: HashMap::new(),
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn node_state(&self, id: NodeId) -> NodeState {
        self.nodes.get(id).state
    }

    pub fn node_outcome(&self, id: NodeId) -> Option<Outcome> {
        self.nodes.get(id).outcome
    }

    pub fn node_failure_type(&self, id: NodeId) -> Option<FailureType> {
        self.nodes.get(id).failure_type
    }

    /// Reads an expression's current live value — e.g. a declared
    /// variable's value after a macro step, for a listener or test harness
    /// that doesn't otherwise touch the expression graph.
    pub fn value_of(&self, expr: ExprId) -> Value {
        self.exprs.get_value(expr)
    }

    pub fn root(&self) -> NodeId {
        self.nodes.root()
    }

    /// Records that `root` (a condition's expression, or any other
    /// expression the driver will activate as a unit) reads through the
    /// lookups in `deps`. Called by the plan builder as it constructs each
    /// condition.
    pub fn register_lookup_deps(&mut self, root: ExprId, deps: Vec<ExprId>) {
        if !deps.is_empty() {
            self.lookup_deps.insert(root, deps);
        }
    }

    /// Starts the plan: activates the root node's conditions and enqueues
    /// it for its first evaluation. `activate_node` itself applies the
    /// node's automatic `Inactive` → `Waiting` transition (§4.G: this step
    /// is gated only by ancestor-interrupt conditions, never by anything
    /// the pending queue's priority order needs to arbitrate), so by the
    /// time this returns the root already reads `Waiting`, not `Inactive`.
    /// Call once before the first [`Self::macro_step`].
    pub fn start(&mut self) -> Result<()> {
        let root = self.nodes.root();
        self.activate_node(root)
    }

    /// Feeds one inbound event straight into the cache/node bookkeeping it
    /// affects, outside of a macro step's quiescence loop — used by tests
    /// and by a caller that wants finer-grained control than
    /// [`Self::macro_step`]'s built-in drain.
    pub fn apply_inbound(&mut self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::LookupReturn { state, value } => {
                let notified = self.cache.apply_external_update(&state, value, self.cycle, self.dispatcher.as_ref())?;
                for lookup_id in notified {
                    self.on_cache_value_changed(ExprId(lookup_id.0 as usize));
                }
            }
            InboundEvent::CommandReturn { command, value } => {
                if let Some(&node_id) = self.command_owner.get(&command) {
                    self.on_command_return(node_id, value);
                }
            }
            InboundEvent::CommandHandleReturn { command, handle } => {
                if let Some(&node_id) = self.command_owner.get(&command) {
                    self.on_command_handle(node_id, handle);
                }
            }
            InboundEvent::CommandAbortAcknowledge { command, ok } => {
                if let Some(&node_id) = self.command_owner.get(&command) {
                    self.on_abort_ack(node_id, ok);
                }
            }
            InboundEvent::AcknowledgeUpdate { update, ok } => {
                if let Some(&node_id) = self.update_owner.get(&update) {
                    self.on_update_ack(node_id, ok);
                }
            }
            // Message-handle/queue bookkeeping is §6 IPC-adapter plumbing
            // with no node-visible effect in this kernel; the facade layer
            // that owns the wire protocol is responsible for it.
            InboundEvent::MessageReceived { .. }
            | InboundEvent::MessageQueueEmpty
            | InboundEvent::AssignMessageHandle { .. }
            | InboundEvent::ReleaseMessageHandle { .. } => {}
        }
        Ok(())
    }

    /// One full macro step (§4.H): drain inbound, run to quiescence
    /// (resolving conflicts between quiescent rounds), then hand off
    /// outbound commands/updates.
    pub fn macro_step(&mut self, inbound: Vec<InboundEvent>) -> Result<()> {
        self.cycle += 1;
        trace!(cycle = self.cycle, inbound = inbound.len(), "starting macro step");
        for event in inbound {
            self.apply_inbound(event)?;
        }

        self.run_to_quiescence()?;

        self.dispatch_outbound();
        Ok(())
    }

    /// Drains the pending queue, resolving assignment/resource conflicts
    /// between quiescent rounds, until nothing is left to evaluate and no
    /// round resolved a conflict. [`Self::macro_step`] wraps this with the
    /// cycle counter and inbound/outbound draining; [`Self::start`] doesn't
    /// call this at all, since activating the root is itself just one
    /// `Inactive` → `Waiting`/`Finished` hop (see `activate_node`), not a
    /// full quiescence pass.
    fn run_to_quiescence(&mut self) -> Result<()> {
        let mut pops: u64 = 0;
        loop {
            while let Some((_, _, idx)) = self.pending.pop_first() {
                pops += 1;
                if pops as u64 > self.config.max_pops_per_cycle as u64 {
                    return Err(ExecError::assertion("exceeded max pops per macro step; plan likely contains a cycle"));
                }
                self.step_node(NodeId(idx))?;
            }
            if !self.resolve_conflicts()? {
                break;
            }
        }
        Ok(())
    }

    // ---- queueing ----------------------------------------------------

    fn enqueue(&mut self, id: NodeId) {
        let node = self.nodes.get(id);
        if node.state != NodeState::Finished {
            self.pending.insert((node.priority, node.doc_order, id.0));
        }
    }

    fn process_notifications(&mut self, tokens: Vec<ListenerToken>) {
        for token in tokens {
            if let Some(lookup_id) = self.lookups.owner_of(token) {
                self.rematerialize_lookup(lookup_id);
            } else {
                let (node_idx, _role) = TokenTable::decode(token);
                self.enqueue(NodeId(node_idx));
            }
        }
    }

    fn rematerialize_lookup(&mut self, lookup_id: ExprId) {
        let mut note = Notifications::default();
        self.lookups.on_input_changed(lookup_id, &mut self.exprs, &mut self.cache, self.dispatcher.as_ref(), self.cycle, &mut note);
        self.process_notifications(note.0);
    }

    fn on_cache_value_changed(&mut self, lookup_id: ExprId) {
        let new_value = self.cache_value_for(lookup_id);
        let mut note = Notifications::default();
        self.lookups.on_cache_update(lookup_id, &mut self.exprs, new_value, self.config.real_epsilon, &mut note);
        self.process_notifications(note.0);
    }

    fn cache_value_for(&self, lookup_id: ExprId) -> Value {
        // The lookup's own `ExternalSource` slot only changes once
        // `LookupTable::report` runs, which is exactly what this call is
        // about to decide whether to do — reading it here would just
        // return the *previous* reported value. Fetch the state the
        // lookup is currently registered against and read its fresh
        // cache entry instead.
        match self.lookups.registered_state(lookup_id) {
            Some(state) => self.cache.get(state).map(|e| e.value().clone()).unwrap_or_else(|| self.exprs.get_value(lookup_id)),
            None => self.exprs.get_value(lookup_id),
        }
    }

    // ---- condition (de)activation -------------------------------------

    /// Activates `id`'s conditions/body and enqueues it, then immediately
    /// applies its automatic `Inactive` → `Waiting`/`Finished` transition
    /// (§4.G: at `Inactive`, the only gating conditions are the
    /// ancestor-propagated ones — there is nothing for the pending queue's
    /// priority order to arbitrate by waiting). A freshly activated node
    /// therefore never reads back as `Inactive` once this returns; it
    /// reads `Waiting` (the common case) or `Finished` (an ancestor
    /// interrupt was already in effect at activation time).
    fn activate_node(&mut self, id: NodeId) -> Result<()> {
        let roles: Vec<(ConditionRole, ExprId)> = {
            let node = self.nodes.get(id);
            ConditionRole::ALL.iter().filter_map(|&r| node.condition(r).map(|e| (r, e))).collect()
        };
        for (role, expr) in roles {
            self.exprs.activate(expr);
            let token = TokenTable::encode(id.0, role.index());
            self.exprs.add_listener(expr, Listener::External(token));
            self.activate_lookup_deps(expr);
        }
        let body_exprs = body_exprs(&self.nodes.get(id).body);
        for expr in body_exprs {
            self.exprs.activate(expr);
            self.activate_lookup_deps(expr);
        }
        self.enqueue(id);

        if self.nodes.get(id).state == NodeState::Inactive {
            if let Some(t) = crate::node::evaluate(self.nodes.get(id), &self.exprs) {
                self.apply_transition(id, t)?;
            }
        }
        Ok(())
    }

    fn deactivate_node(&mut self, id: NodeId) {
        let roles: Vec<(ConditionRole, ExprId)> = {
            let node = self.nodes.get(id);
            ConditionRole::ALL.iter().filter_map(|&r| node.condition(r).map(|e| (r, e))).collect()
        };
        for (role, expr) in roles {
            let token = TokenTable::encode(id.0, role.index());
            self.exprs.remove_listener(expr, Listener::External(token));
            self.deactivate_lookup_deps(expr);
            self.exprs.deactivate(expr);
        }
        let body_exprs = body_exprs(&self.nodes.get(id).body);
        for expr in body_exprs {
            self.deactivate_lookup_deps(expr);
            self.exprs.deactivate(expr);
        }
    }

    fn activate_lookup_deps(&mut self, expr: ExprId) {
        let deps = self.lookup_deps.get(&expr).cloned().unwrap_or_default();
        for lookup_id in deps {
            let mut note = Notifications::default();
            self.lookups.activate(lookup_id, &mut self.exprs, &mut self.cache, self.dispatcher.as_ref(), self.cycle, &mut note);
            self.process_notifications(note.0);
        }
    }

    fn deactivate_lookup_deps(&mut self, expr: ExprId) {
        let deps = self.lookup_deps.get(&expr).cloned().unwrap_or_default();
        for lookup_id in deps {
            self.lookups.deactivate(lookup_id, &mut self.exprs, &mut self.cache, self.dispatcher.as_ref());
        }
    }

    // ---- node stepping --------------------------------------------------

    fn step_node(&mut self, id: NodeId) -> Result<()> {
        loop {
            let transition = {
                let node = self.nodes.get(id);
                if node.state == NodeState::Finished {
                    None
                } else {
                    crate::node::evaluate(node, &self.exprs)
                }
            };
            let Some(t) = transition else { break };
            self.apply_transition(id, t)?;
        }
        Ok(())
    }

    fn apply_transition(&mut self, id: NodeId, t: crate::node::NodeTransition) -> Result<()> {
        let from = self.nodes.get(id).state;
        debug!(node = %self.nodes.get(id).name, ?from, to = ?t.to, "node transition");
        self.exit_state(id, from);
        {
            let node = self.nodes.get_mut(id);
            node.state = t.to;
            if let Some(o) = t.outcome {
                node.outcome = Some(o);
            }
            if let Some(f) = t.failure_type {
                node.failure_type = Some(f);
            }
        }
        self.enter_state(id, t.to)?;
        Ok(())
    }

    fn exit_state(&mut self, _id: NodeId, _from: NodeState) {}

    fn enter_state(&mut self, id: NodeId, state: NodeState) -> Result<()> {
        match state {
            NodeState::Waiting => {
                self.reset_for_iteration(id);
            }
            NodeState::Executing => self.dispatch_action(id)?,
            NodeState::Failing => self.request_abort(id),
            NodeState::FailingIteration | NodeState::IterationEnded | NodeState::FinishingExecution => {}
            NodeState::Finished => self.finish_node(id),
            NodeState::Inactive => {}
        }
        Ok(())
    }

    /// Clears the per-iteration bookkeeping a repeating node's next pass
    /// through `Executing` needs to start fresh.
    fn reset_for_iteration(&mut self, id: NodeId) {
        if let Some(done) = self.nodes.get(id).condition(ConditionRole::ActionComplete) {
            let mut note = Notifications::default();
            self.exprs.set_external(done, Value::Boolean(false), &mut note);
            self.process_notifications(note.0);
        }
        let body = &mut self.nodes.get_mut(id).body;
        if let NodeBody::Command(cmd) = body {
            cmd.dispatch_state = CommandDispatchState::NotStarted;
            cmd.handle = None;
            cmd.command_id = None;
        }
    }

    fn dispatch_action(&mut self, id: NodeId) -> Result<()> {
        match self.nodes.get(id).node_type {
            NodeType::Empty => self.set_action_complete(id, true),
            NodeType::Assignment => self.perform_assignment(id)?,
            NodeType::Command => self.claim_command_resource(id)?,
            NodeType::Update => self.queue_update(id)?,
            NodeType::List | NodeType::LibraryCall => self.start_children(id)?,
        }
        Ok(())
    }

    fn set_action_complete(&mut self, id: NodeId, done: bool) {
        if let Some(expr) = self.nodes.get(id).condition(ConditionRole::ActionComplete) {
            let mut note = Notifications::default();
            self.exprs.set_external(expr, Value::Boolean(done), &mut note);
            self.process_notifications(note.0);
        }
    }

    fn perform_assignment(&mut self, id: NodeId) -> Result<()> {
        let (target, rhs, priority, doc_order) = {
            let node = self.nodes.get(id);
            let NodeBody::Assignment(rec) = &node.body else {
                return Err(ExecError::assertion("Assignment node body mismatch"));
            };
            (rec.target, rec.rhs, node.priority, node.doc_order)
        };
        let value = self.exprs.get_value(rhs);
        self.assignment_claims.entry(target).or_default().push((priority, doc_order, id, value));
        Ok(())
    }

    fn claim_command_resource(&mut self, id: NodeId) -> Result<()> {
        let (priority, doc_order, resource) = {
            let node = self.nodes.get(id);
            let NodeBody::Command(rec) = &node.body else {
                return Err(ExecError::assertion("Command node body mismatch"));
            };
            let name = self.exprs.get_value(rec.name);
            let resource_key = name.as_str().unwrap_or(&node.name).to_string();
            (rec.resource_priority, node.doc_order, resource_key)
        };
        self.resource_claims.entry(resource).or_default().push((priority, doc_order, id));
        Ok(())
    }

    fn queue_update(&mut self, id: NodeId) -> Result<()> {
        let id_val = UpdateId(self.next_update_id);
        self.next_update_id += 1;
        {
            let node = self.nodes.get_mut(id);
            let NodeBody::Update(rec) = &mut node.body else {
                return Err(ExecError::assertion("Update node body mismatch"));
            };
            rec.update_id = Some(id_val);
        }
        self.update_owner.insert(id_val, id);
        self.outbound_updates.push(PendingUpdate { node: id, id: id_val });
        Ok(())
    }

    fn start_children(&mut self, id: NodeId) -> Result<()> {
        let children = self.nodes.get(id).children.clone();
        for child in children {
            self.activate_node(child)?;
        }
        if children_is_empty(&self.nodes, id) {
            self.nodes.get_mut(id).outcome = Some(Outcome::Success);
            self.set_action_complete(id, true);
        }
        Ok(())
    }

    fn request_abort(&mut self, id: NodeId) {
        match self.nodes.get(id).node_type {
            NodeType::Command => {
                let (should_abort, req) = {
                    let node = self.nodes.get(id);
                    let NodeBody::Command(rec) = &node.body else { unreachable!() };
                    match (rec.dispatch_state, rec.command_id) {
                        (CommandDispatchState::Sent | CommandDispatchState::HandleReceived, Some(cid)) => {
                            (true, Some(CommandRequest { id: cid, name: node.name.clone(), args: Vec::new() }))
                        }
                        _ => (false, None),
                    }
                };
                if should_abort {
                    if let Some(req) = req {
                        self.dispatcher.invoke_abort(&req);
                    }
                    if let NodeBody::Command(rec) = &mut self.nodes.get_mut(id).body {
                        rec.dispatch_state = CommandDispatchState::AbortRequested;
                    }
                } else {
                    self.mark_abort_complete(id);
                }
            }
            NodeType::List | NodeType::LibraryCall => {
                let children: Vec<NodeId> = self.nodes.get(id).children.clone();
                for child in children {
                    if self.nodes.get(child).state != NodeState::Finished && self.nodes.get(child).state != NodeState::Inactive {
                        self.force_interrupt(child);
                    }
                }
                self.mark_abort_complete(id);
            }
            _ => self.mark_abort_complete(id),
        }
    }

    /// Forces a still-running child straight to `Failing` when its parent
    /// is being interrupted — the §4.G "ancestor condition propagates
    /// downward" half of the contract, applied immediately rather than
    /// waiting for the child's own listener to notice (the child's
    /// `AncestorExitCondition`/`AncestorInvariantCondition` is wired to the
    /// same source and will agree on the next read; this just avoids a
    /// redundant macro-step round trip).
    fn force_interrupt(&mut self, id: NodeId) {
        let state = self.nodes.get(id).state;
        if matches!(state, NodeState::Waiting | NodeState::Inactive) {
            let _ = self.apply_transition(id, crate::node::NodeTransition { to: NodeState::Finished, outcome: Some(Outcome::Interrupted), failure_type: Some(FailureType::ParentExited) });
        } else if matches!(state, NodeState::Executing) {
            let _ = self.apply_transition(id, crate::node::NodeTransition { to: NodeState::Failing, outcome: None, failure_type: Some(FailureType::ParentExited) });
        }
    }

    fn mark_abort_complete(&mut self, id: NodeId) {
        if let Some(expr) = self.nodes.get(id).condition(ConditionRole::AbortComplete) {
            let mut note = Notifications::default();
            self.exprs.set_external(expr, Value::Boolean(true), &mut note);
            self.process_notifications(note.0);
        } else {
            self.enqueue(id);
        }
    }

    fn finish_node(&mut self, id: NodeId) {
        self.deactivate_node(id);
        let parent = self.nodes.get(id).parent;
        let Some(parent) = parent else { return };
        if !matches!(self.nodes.get(parent).node_type, NodeType::List | NodeType::LibraryCall) {
            return;
        }
        let children = self.nodes.get(parent).children.clone();
        let all_finished = children.iter().all(|c| self.nodes.get(*c).state == NodeState::Finished);
        if !all_finished {
            return;
        }
        let aggregate = aggregate_outcome(&children.iter().map(|c| self.nodes.get(*c).outcome).collect::<Vec<_>>());
        self.nodes.get_mut(parent).outcome = Some(aggregate);
        self.set_action_complete(parent, true);
    }

    // ---- inbound event handlers -----------------------------------------

    fn on_command_return(&mut self, id: NodeId, value: Value) {
        let target = {
            let node = self.nodes.get_mut(id);
            let NodeBody::Command(rec) = &mut node.body else { return };
            rec.dispatch_state = CommandDispatchState::ReturnReceived;
            rec.return_target
        };
        if let Some(target) = target {
            let mut note = Notifications::default();
            let _ = self.exprs.set_variable(target, value, &mut note);
            self.process_notifications(note.0);
        }
        self.set_action_complete(id, true);
    }

    fn on_command_handle(&mut self, id: NodeId, handle: plexil_value::CommandHandle) {
        {
            let node = self.nodes.get_mut(id);
            let NodeBody::Command(rec) = &mut node.body else { return };
            rec.handle = Some(handle);
            rec.dispatch_state = CommandDispatchState::HandleReceived;
        }
        if let Some(expr) = self.nodes.get(id).condition(ConditionRole::CommandHandleReceived) {
            let mut note = Notifications::default();
            self.exprs.set_external(expr, Value::Boolean(true), &mut note);
            self.process_notifications(note.0);
        }
        use plexil_value::CommandHandle::*;
        if matches!(handle, CommandRejected | CommandDenied | CommandFailed) {
            self.set_action_complete(id, true);
        }
    }

    fn on_abort_ack(&mut self, id: NodeId, _ok: bool) {
        if let NodeBody::Command(rec) = &mut self.nodes.get_mut(id).body {
            rec.dispatch_state = CommandDispatchState::AbortAcknowledged;
        }
        self.mark_abort_complete(id);
    }

    fn on_update_ack(&mut self, id: NodeId, ok: bool) {
        if let NodeBody::Update(rec) = &mut self.nodes.get_mut(id).body {
            rec.acknowledged = ok;
        }
        self.set_action_complete(id, true);
    }

    // ---- conflict resolution --------------------------------------------

    /// Runs one round of assignment/resource arbitration. Returns whether
    /// anything was resolved — if so, the caller re-runs the quiescence
    /// loop, since a loser's forced `Finished` transition can itself
    /// unblock siblings.
    fn resolve_conflicts(&mut self) -> Result<bool> {
        let mut resolved = false;

        for (target, claims) in std::mem::take(&mut self.assignment_claims) {
            resolved = true;
            let winner = claims.iter().min_by_key(|c| (c.0, c.1)).map(|c| c.2).expect("non-empty claim list");
            for (_, _, node_id, value) in claims {
                if node_id == winner {
                    let mut note = Notifications::default();
                    self.exprs.set_variable(target, value, &mut note)?;
                    self.process_notifications(note.0);
                    self.set_action_complete(node_id, true);
                } else {
                    self.force_finish(node_id, Outcome::Failure, Some(FailureType::CommandArbitrationFailure));
                }
            }
        }

        for (resource, claims) in std::mem::take(&mut self.resource_claims) {
            resolved = true;
            let winner = claims.iter().min_by_key(|c| (c.0, c.1)).map(|c| c.2).expect("non-empty claim list");
            for (_, _, node_id) in claims {
                if node_id == winner {
                    self.send_command(node_id, &resource)?;
                } else {
                    self.dispatcher.report_command_arbitration_failure(&CommandRequest { id: CommandId(0), name: resource.clone(), args: Vec::new() });
                    self.force_finish(node_id, Outcome::Failure, Some(FailureType::CommandArbitrationFailure));
                }
            }
        }

        Ok(resolved)
    }

    fn send_command(&mut self, id: NodeId, resource: &str) -> Result<()> {
        let cid = CommandId(self.next_command_id);
        self.next_command_id += 1;
        let args = {
            let node = self.nodes.get(id);
            let NodeBody::Command(rec) = &node.body else {
                return Err(ExecError::assertion("Command node body mismatch"));
            };
            rec.args.iter().map(|a| self.exprs.get_value(*a)).collect::<Vec<_>>()
        };
        {
            let node = self.nodes.get_mut(id);
            let NodeBody::Command(rec) = &mut node.body else { unreachable!() };
            rec.command_id = Some(cid);
            rec.dispatch_state = CommandDispatchState::Sent;
        }
        self.command_owner.insert(cid, id);
        self.outbound_commands.push(PendingCommand { node: id, id: cid });
        let _ = resource;
        let _ = args;
        Ok(())
    }

    fn force_finish(&mut self, id: NodeId, outcome: Outcome, failure: Option<FailureType>) {
        let from = self.nodes.get(id).state;
        self.exit_state(id, from);
        {
            let node = self.nodes.get_mut(id);
            node.state = NodeState::Finished;
            node.outcome = Some(outcome);
            node.failure_type = failure;
        }
        let _ = self.enter_state(id, NodeState::Finished);
    }

    // ---- outbound dispatch ------------------------------------------------

    fn dispatch_outbound(&mut self) {
        for pending in std::mem::take(&mut self.outbound_commands) {
            let (name, args) = {
                let node = self.nodes.get(pending.node);
                let NodeBody::Command(rec) = &node.body else { continue };
                let name = self.exprs.get_value(rec.name).as_str().unwrap_or(&node.name).to_string();
                let args = rec.args.iter().map(|a| self.exprs.get_value(*a)).collect::<Vec<_>>();
                (name, args)
            };
            self.dispatcher.execute_command(&CommandRequest { id: pending.id, name, args });
        }
        for pending in std::mem::take(&mut self.outbound_updates) {
            let pairs = {
                let node = self.nodes.get(pending.node);
                let NodeBody::Update(rec) = &node.body else { continue };
                rec.pairs.iter().map(|(k, v)| (k.clone(), self.exprs.get_value(*v))).collect::<Vec<_>>()
            };
            self.dispatcher.execute_update(&UpdateRequest { id: pending.id, pairs });
        }
    }
}

fn children_is_empty(nodes: &NodeArena, id: NodeId) -> bool {
    nodes.get(id).children.is_empty()
}

/// The non-condition expressions a node needs active for its whole
/// lifetime so they read live values rather than the inactive-expression
/// `Unknown` default, even though nothing listens for their changes.
fn body_exprs(body: &NodeBody) -> Vec<ExprId> {
    match body {
        NodeBody::Assignment(rec) => vec![rec.target, rec.rhs],
        NodeBody::Command(rec) => {
            let mut v = vec![rec.name];
            v.extend(rec.args.iter().copied());
            v
        }
        NodeBody::Update(rec) => rec.pairs.iter().map(|(_, v)| *v).collect(),
        NodeBody::List | NodeBody::Empty | NodeBody::LibraryCall { .. } => Vec::new(),
    }
}

/// Combines a `List`/`LibraryCall` node's children's outcomes per §3: any
/// `Failure` dominates, then any `Interrupted`, otherwise `Success`
/// (`Skipped` children don't prevent an otherwise-successful list from
/// succeeding).
fn aggregate_outcome(outcomes: &[Option<Outcome>]) -> Outcome {
    if outcomes.iter().any(|o| *o == Some(Outcome::Failure)) {
        Outcome::Failure
    } else if outcomes.iter().any(|o| *o == Some(Outcome::Interrupted)) {
        Outcome::Interrupted
    } else {
        Outcome::Success
    }
}
