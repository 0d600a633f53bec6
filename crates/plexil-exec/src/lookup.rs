//! [`Lookup`] and `LookupOnChange` (§4.D): expressions that materialize a
//! `State` each cycle, register with the state cache entry, and (for
//! on-change lookups) maintain a per-lookup tolerance and "last reported"
//! value.
//!
//! A lookup's *value* lives in the expression graph as an
//! [`crate::expr::ExprId`] of external-source kind — the graph itself
//! doesn't know it's cache-backed. This module is the bridge: it owns the
//! name/parameter/tolerance `ExprId`s, listens to them via
//! [`crate::expr::Listener::External`], and drives the corresponding
//! `plexil_cache::StateCache` registration.

use std::collections::HashMap;

use plexil_cache::{CacheConfig, Dispatcher, LookupId as CacheLookupId, StateCache};
use plexil_value::{State, Value, ValueType};

use crate::expr::{ExprArena, ExprId, ExternalListenerSink, Listener, ListenerToken};

/// `plexil_cache::LookupId` is a bare `u64`; a `Lookup`'s cache registration
/// reuses its own `ExprId` as that handle, so there's exactly one
/// allocation scheme across both crates and no separate id table to keep
/// in sync.
fn cache_lookup_id(lookup: ExprId) -> CacheLookupId {
    CacheLookupId(lookup.0 as u64)
}

/// Per-lookup bookkeeping not already captured by the expression graph:
/// the inputs that determine *which* state it reads, and — for an
/// on-change lookup — the tolerance it last reported against.
struct LookupEntry {
    name: ExprId,
    params: Vec<ExprId>,
    declared_type: ValueType,
    /// `Some` for `LookupOnChange`, carrying its tolerance expression and
    /// the value it last forwarded to its own listeners.
    change: Option<ChangeState>,
    registered_state: Option<State>,
    name_token: ListenerToken,
    param_tokens: Vec<ListenerToken>,
    tolerance_token: Option<ListenerToken>,
}

struct ChangeState {
    tolerance: ExprId,
    last_reported: Value,
}

/// Owns every `Lookup`/`LookupOnChange` in a plan and the glue between
/// their graph-side `ExprId` and the cache-side `State`/`LookupId`.
#[derive(Default)]
pub struct LookupTable {
    lookups: HashMap<ExprId, LookupEntry>,
    /// Reverse index from a minted token back to the lookup it belongs to,
    /// so the exec driver can turn a bare `notify_external` callback into
    /// "re-materialize this lookup" without needing to know the token
    /// scheme itself.
    token_owner: HashMap<ListenerToken, ExprId>,
    next_token: u64,
}

impl LookupTable {
    pub fn new() -> Self {
        LookupTable::default()
    }

    fn mint_token(&mut self, owner: ExprId) -> ListenerToken {
        // High bit set so these never collide with node-condition tokens,
        // which are `TokenTable::encode`'d from small node indices.
        let token = ListenerToken((1u64 << 56) | self.next_token);
        self.next_token += 1;
        self.token_owner.insert(token, owner);
        token
    }

    /// The lookup `token` was minted for, if it belongs to this table.
    pub fn owner_of(&self, token: ListenerToken) -> Option<ExprId> {
        self.token_owner.get(&token).copied()
    }

    /// Registers a plain lookup. `lookup_id` must already be an
    /// `external_source` expression in `arena`.
    pub fn add_lookup(&mut self, arena: &mut ExprArena, lookup_id: ExprId, name: ExprId, params: Vec<ExprId>, declared_type: ValueType) {
        let name_token = self.mint_token(lookup_id);
        let param_tokens: Vec<ListenerToken> = params.iter().map(|_| self.mint_token(lookup_id)).collect();
        arena.add_listener(name, Listener::External(name_token));
        for (&p, &tok) in params.iter().zip(&param_tokens) {
            arena.add_listener(p, Listener::External(tok));
        }
        self.lookups.insert(
            lookup_id,
            LookupEntry {
                name,
                params,
                declared_type,
                change: None,
                registered_state: None,
                name_token,
                param_tokens,
                tolerance_token: None,
            },
        );
    }

    /// Registers an on-change lookup, additionally listening to `tolerance`.
    pub fn add_lookup_on_change(
        &mut self,
        arena: &mut ExprArena,
        lookup_id: ExprId,
        name: ExprId,
        params: Vec<ExprId>,
        declared_type: ValueType,
        tolerance: ExprId,
    ) {
        self.add_lookup(arena, lookup_id, name, params, declared_type);
        let tolerance_token = self.mint_token(lookup_id);
        arena.add_listener(tolerance, Listener::External(tolerance_token));
        let entry = self.lookups.get_mut(&lookup_id).expect("just inserted");
        entry.change = Some(ChangeState { tolerance, last_reported: Value::unknown(declared_type) });
        entry.tolerance_token = Some(tolerance_token);
    }

    pub fn is_lookup_token(&self, token: ListenerToken) -> bool {
        token.0 & (1u64 << 56) != 0
    }

    /// The `State` `lookup_id` is currently registered against, if any —
    /// lets the driver fetch the freshly-written cache value on a
    /// `lookupReturn` rather than re-reading the lookup's own (stale)
    /// `ExternalSource` slot.
    pub fn registered_state(&self, lookup_id: ExprId) -> Option<&State> {
        self.lookups.get(&lookup_id).and_then(|e| e.registered_state.as_ref())
    }

    /// Activates `lookup_id`'s inputs and materializes its initial state
    /// registration — called when the owning node's condition activates
    /// the lookup for the first time.
    pub fn activate(
        &mut self,
        lookup_id: ExprId,
        arena: &mut ExprArena,
        cache: &mut StateCache,
        dispatcher: &dyn Dispatcher,
        cycle: u64,
        sink: &mut dyn ExternalListenerSink,
    ) {
        arena.activate(lookup_id);
        let (name, params, tolerance) = {
            let e = &self.lookups[&lookup_id];
            (e.name, e.params.clone(), e.change.as_ref().map(|c| c.tolerance))
        };
        arena.activate(name);
        for p in &params {
            arena.activate(*p);
        }
        if let Some(t) = tolerance {
            arena.activate(t);
        }
        self.materialize(lookup_id, arena, cache, dispatcher, cycle, sink);
    }

    pub fn deactivate(&mut self, lookup_id: ExprId, arena: &mut ExprArena, cache: &mut StateCache, dispatcher: &dyn Dispatcher) {
        self.unregister(lookup_id, cache, dispatcher);
        let (name, params, tolerance) = {
            let e = &self.lookups[&lookup_id];
            (e.name, e.params.clone(), e.change.as_ref().map(|c| c.tolerance))
        };
        arena.deactivate(name);
        for p in &params {
            arena.deactivate(*p);
        }
        if let Some(t) = tolerance {
            arena.deactivate(t);
        }
        arena.deactivate(lookup_id);
    }

    /// Called by the driver when an `ExternalListenerSink::notify_external`
    /// callback resolves to one of this table's tokens: the name,
    /// parameter, or tolerance subexpression of some lookup changed, so the
    /// lookup must unregister from its old state (if any) and re-register
    /// against whatever `State` its inputs now name.
    pub fn on_input_changed(
        &mut self,
        lookup_id: ExprId,
        arena: &mut ExprArena,
        cache: &mut StateCache,
        dispatcher: &dyn Dispatcher,
        cycle: u64,
        sink: &mut dyn ExternalListenerSink,
    ) {
        self.unregister(lookup_id, cache, dispatcher);
        self.materialize(lookup_id, arena, cache, dispatcher, cycle, sink);
    }

    fn unregister(&mut self, lookup_id: ExprId, cache: &mut StateCache, dispatcher: &dyn Dispatcher) {
        let entry = self.lookups.get_mut(&lookup_id).expect("unknown lookup id");
        if let Some(state) = entry.registered_state.take() {
            cache.unregister_lookup(&state, cache_lookup_id(lookup_id), dispatcher);
            if entry.change.is_some() {
                cache.unregister_tolerance(&state, cache_lookup_id(lookup_id), dispatcher);
            }
        }
    }

    /// Evaluates name+parameters; if all are known, builds the `State`,
    /// ensures its cache entry, and registers. If any is Unknown, the
    /// lookup reports Unknown and stays unregistered (§4.D).
    fn materialize(
        &mut self,
        lookup_id: ExprId,
        arena: &mut ExprArena,
        cache: &mut StateCache,
        dispatcher: &dyn Dispatcher,
        cycle: u64,
        sink: &mut dyn ExternalListenerSink,
    ) {
        let (name, params, declared_type, tolerance) = {
            let e = &self.lookups[&lookup_id];
            (e.name, e.params.clone(), e.declared_type, e.change.as_ref().map(|c| c.tolerance))
        };

        let name_value = arena.get_value(name);
        let Some(state_name) = name_value.as_str().map(|s| s.to_string()) else {
            arena.set_external(lookup_id, Value::unknown(declared_type), sink);
            return;
        };

        let mut param_values = Vec::with_capacity(params.len());
        for p in &params {
            let v = arena.get_value(*p);
            if !v.is_known() {
                arena.set_external(lookup_id, Value::unknown(declared_type), sink);
                return;
            }
            param_values.push(v);
        }

        let state = State::new(state_name, param_values);
        let id = cache_lookup_id(lookup_id);
        cache
            .register_lookup(&state, id, cycle, dispatcher)
            .expect("state cache type invariant violated by lookup registration");

        if let Some(tol_id) = tolerance {
            let tol_value = arena.get_value(tol_id);
            let tolerance_arg = if tol_value.is_known() { Some(tol_value) } else { None };
            cache.register_tolerance(&state, id, tolerance_arg, dispatcher);
        }

        let current = cache.get(&state).expect("just registered").value().clone();
        self.lookups.get_mut(&lookup_id).unwrap().registered_state = Some(state);
        self.report(lookup_id, arena, current, sink);
    }

    /// Called by the driver when the cache entry a lookup is registered
    /// against reports a change. Plain lookups forward unconditionally;
    /// on-change lookups additionally gate on their own tolerance band
    /// around their own last-reported value (§4.D) — a second, per-lookup
    /// filter distinct from the cache's aggregate threshold, since one
    /// lookup's tolerance may be looser than the cache's intersection band.
    pub fn on_cache_update(&mut self, lookup_id: ExprId, arena: &mut ExprArena, new_value: Value, epsilon: f64, sink: &mut dyn ExternalListenerSink) {
        let Some(entry) = self.lookups.get_mut(&lookup_id) else { return };
        let Some(change) = &mut entry.change else {
            self.report(lookup_id, arena, new_value, sink);
            return;
        };
        let tolerance_value = arena.get_value(change.tolerance);
        let crossed = !crosses_within_band(&change.last_reported, tolerance_value.as_f64().or(tolerance_value.as_i64().map(|i| i as f64)), &new_value, epsilon);
        if crossed {
            change.last_reported = new_value.clone();
            self.report(lookup_id, arena, new_value, sink);
        }
    }

    fn report(&mut self, lookup_id: ExprId, arena: &mut ExprArena, value: Value, sink: &mut dyn ExternalListenerSink) {
        arena.set_external(lookup_id, value, sink);
    }

    pub fn config_default() -> CacheConfig {
        CacheConfig::default()
    }
}

/// True when `new` is still within `[last - |tolerance|, last + |tolerance|]`
/// (so no report is due). `tolerance = None` (Unknown) collapses the band
/// to a point — any change is a crossing. Mirrors
/// `plexil_cache::cache_entry::ThresholdBand::is_exceeded`'s relative-
/// epsilon guard for `Real`, applied here at the per-lookup level.
fn crosses_within_band(last: &Value, tolerance: Option<f64>, new: &Value, epsilon: f64) -> bool {
    let (Some(last_f), Some(new_f)) = (last.as_f64(), new.as_f64()) else {
        return *last == *new;
    };
    let t = tolerance.unwrap_or(0.0).abs();
    let guard = epsilon * new_f.abs();
    new_f >= last_f - t - guard && new_f <= last_f + t + guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexil_cache::{CommandRequest, UpdateRequest};
    use plexil_value::ValueType;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDispatcher {
        primed: Mutex<Value>,
    }
    impl Dispatcher for FakeDispatcher {
        fn lookup_now(&self, _state: &State) -> Value {
            self.primed.lock().unwrap().clone()
        }
        fn set_thresholds(&self, _state: &State, _low: Value, _high: Value) {}
        fn clear_thresholds(&self, _state: &State) {}
        fn execute_command(&self, _cmd: &CommandRequest) {}
        fn invoke_abort(&self, _cmd: &CommandRequest) {}
        fn report_command_arbitration_failure(&self, _cmd: &CommandRequest) {}
        fn execute_update(&self, _update: &UpdateRequest) {}
    }

    #[test]
    fn lookup_with_unknown_parameter_stays_unknown() {
        let mut arena = ExprArena::new();
        let mut table = LookupTable::new();
        let mut cache = StateCache::new();
        let dispatcher = FakeDispatcher::default();
        let mut sink = crate::expr::NullSink;

        let name = arena.constant(Value::String("battery".into()));
        let lookup = arena.external_source(ValueType::Real);
        table.add_lookup(&mut arena, lookup, name, vec![], ValueType::Real);
        table.activate(lookup, &mut arena, &mut cache, &dispatcher, 1, &mut sink);

        assert!(!arena.get_value(lookup).is_known());
    }

    #[test]
    fn lookup_materializes_current_cache_value_on_activation() {
        let mut arena = ExprArena::new();
        let mut table = LookupTable::new();
        let mut cache = StateCache::new();
        let dispatcher = FakeDispatcher { primed: Mutex::new(Value::Real(72.0)) };
        let mut sink = crate::expr::NullSink;

        let name = arena.constant(Value::String("battery".into()));
        let lookup = arena.external_source(ValueType::Real);
        table.add_lookup(&mut arena, lookup, name, vec![], ValueType::Real);
        table.activate(lookup, &mut arena, &mut cache, &dispatcher, 1, &mut sink);

        assert_eq!(arena.get_value(lookup), Value::Real(72.0));
    }

    #[test]
    fn on_change_lookup_suppresses_reports_within_tolerance() {
        let mut arena = ExprArena::new();
        let mut table = LookupTable::new();
        let mut cache = StateCache::new();
        let dispatcher = FakeDispatcher::default();
        let mut sink = crate::expr::NullSink;

        let name = arena.constant(Value::String("temp".into()));
        let tolerance = arena.constant(Value::Real(0.5));
        let lookup = arena.external_source(ValueType::Real);
        table.add_lookup_on_change(&mut arena, lookup, name, vec![], ValueType::Real, tolerance);
        table.activate(lookup, &mut arena, &mut cache, &dispatcher, 1, &mut sink);

        let state = State::nullary("temp");
        cache.apply_external_update(&state, Value::Real(9.0), 1, &dispatcher).unwrap();
        table.on_cache_update(lookup, &mut arena, Value::Real(9.0), 1e-13, &mut sink);
        assert_eq!(arena.get_value(lookup), Value::Real(9.0));

        // Within tolerance of the last-reported 9.0: not re-reported.
        table.on_cache_update(lookup, &mut arena, Value::Real(9.3), 1e-13, &mut sink);
        assert_eq!(arena.get_value(lookup), Value::Real(9.0));

        // Past tolerance: reported.
        table.on_cache_update(lookup, &mut arena, Value::Real(9.9), 1e-13, &mut sink);
        assert_eq!(arena.get_value(lookup), Value::Real(9.9));
    }
}
