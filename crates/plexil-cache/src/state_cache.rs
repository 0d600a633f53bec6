//! [`StateCache`]: the map from [`State`] to [`StateCacheEntry`] — the sole
//! interface between the kernel and the outside world for reads.

use std::collections::BTreeMap;

use plexil_value::{State, Value};
use tracing::{debug, trace};

use crate::cache_entry::{LookupId, StateCacheEntry, ThresholdChange, WriteOutcome};
use crate::dispatcher::Dispatcher;
use crate::error::Result;

/// Owns one [`StateCacheEntry`] per distinct [`State`] ever looked up.
/// `BTreeMap` keeps iteration in `State`'s total order, which is useful for
/// deterministic test output and has no bearing on kernel semantics (the
/// kernel never relies on cache iteration order).
#[derive(Debug, Default)]
pub struct StateCache {
    entries: BTreeMap<State, StateCacheEntry>,
}

impl StateCache {
    pub fn new() -> Self {
        StateCache { entries: BTreeMap::new() }
    }

    /// Creates the entry on miss (`ensureEntry` in §4.C).
    pub fn ensure_entry(&mut self, state: &State) -> &mut StateCacheEntry {
        self.entries
            .entry(state.clone())
            .or_insert_with(|| StateCacheEntry::new(state.name()))
    }

    pub fn get(&self, state: &State) -> Option<&StateCacheEntry> {
        self.entries.get(state)
    }

    /// Registers `id` as a consumer of `state`. If the entry is stale with
    /// respect to `cycle`, synchronously primes it via
    /// `dispatcher.lookup_now` before returning, per §4.C.
    pub fn register_lookup(
        &mut self,
        state: &State,
        id: LookupId,
        cycle: u64,
        dispatcher: &dyn Dispatcher,
    ) -> Result<()> {
        let entry = self.ensure_entry(state);
        entry.register_lookup(id);
        if entry.is_stale(cycle) {
            trace!(state = %state, "cache entry stale, priming via lookup_now");
            let primed = dispatcher.lookup_now(state);
            self.apply_external_update(state, primed, cycle, dispatcher)?;
        }
        Ok(())
    }

    /// Unregisters `id`; if this changes the derived threshold band,
    /// informs the dispatcher.
    pub fn unregister_lookup(&mut self, state: &State, id: LookupId, dispatcher: &dyn Dispatcher) {
        if let Some(entry) = self.entries.get_mut(state) {
            let change = entry.unregister_lookup(id);
            notify_threshold_change(state, entry, change, dispatcher);
        }
    }

    pub fn register_tolerance(
        &mut self,
        state: &State,
        id: LookupId,
        tolerance: Option<Value>,
        dispatcher: &dyn Dispatcher,
    ) {
        let entry = self.ensure_entry(state);
        let change = entry.register_tolerance(id, tolerance);
        notify_threshold_change(state, entry, change, dispatcher);
    }

    pub fn unregister_tolerance(&mut self, state: &State, id: LookupId, dispatcher: &dyn Dispatcher) {
        if let Some(entry) = self.entries.get_mut(state) {
            let change = entry.unregister_tolerance(id);
            notify_threshold_change(state, entry, change, dispatcher);
        }
    }

    /// Applies an update that originated from the external world
    /// (`lookupReturn`), returning the set of consumers to notify.
    pub fn apply_external_update(
        &mut self,
        state: &State,
        value: Value,
        timestamp: u64,
        dispatcher: &dyn Dispatcher,
    ) -> Result<Vec<LookupId>> {
        let entry = self.ensure_entry(state);
        let outcome = entry.update(value, timestamp)?;
        Ok(self.finish_write(state, outcome, dispatcher))
    }

    pub fn apply_external_unknown(
        &mut self,
        state: &State,
        timestamp: u64,
        dispatcher: &dyn Dispatcher,
    ) -> Vec<LookupId> {
        let entry = self.ensure_entry(state);
        let outcome = entry.set_unknown(timestamp);
        self.finish_write(state, outcome, dispatcher)
    }

    fn finish_write(&mut self, state: &State, outcome: WriteOutcome, dispatcher: &dyn Dispatcher) -> Vec<LookupId> {
        let entry = self.entries.get(state).expect("entry just written");
        if outcome.threshold_change != ThresholdChange::Unchanged {
            notify_threshold_change(state, entry, outcome.threshold_change, dispatcher);
        }
        if outcome.changed {
            debug!(state = %state, timestamp = entry.timestamp(), "state cache entry updated");
            entry.consumers().copied().collect()
        } else {
            Vec::new()
        }
    }
}

fn notify_threshold_change(
    state: &State,
    entry: &StateCacheEntry,
    change: ThresholdChange,
    dispatcher: &dyn Dispatcher,
) {
    match change {
        ThresholdChange::Set => {
            if let Some(band) = entry.thresholds() {
                let (low, high) = band_bounds(band);
                debug!(state = %state, "notifying dispatcher of new threshold band");
                dispatcher.set_thresholds(state, low, high);
            }
        }
        ThresholdChange::Cleared => {
            debug!(state = %state, "notifying dispatcher thresholds cleared");
            dispatcher.clear_thresholds(state);
        }
        ThresholdChange::Unchanged => {}
    }
}

fn band_bounds(band: crate::cache_entry::ThresholdBand) -> (Value, Value) {
    use crate::cache_entry::ThresholdBand::*;
    match band {
        Integer { low, high } => (Value::Integer(low), Value::Integer(high)),
        Real { low, high } => (Value::Real(low), Value::Real(high)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDispatcher {
        primed: Value,
        set_calls: Mutex<Vec<(Value, Value)>>,
        cleared: Mutex<u32>,
    }

    impl Dispatcher for FakeDispatcher {
        fn lookup_now(&self, _state: &State) -> Value {
            self.primed.clone()
        }
        fn set_thresholds(&self, _state: &State, low: Value, high: Value) {
            self.set_calls.lock().unwrap().push((low, high));
        }
        fn clear_thresholds(&self, _state: &State) {
            *self.cleared.lock().unwrap() += 1;
        }
        fn execute_command(&self, _cmd: &crate::dispatcher::CommandRequest) {}
        fn invoke_abort(&self, _cmd: &crate::dispatcher::CommandRequest) {}
        fn report_command_arbitration_failure(&self, _cmd: &crate::dispatcher::CommandRequest) {}
        fn execute_update(&self, _update: &crate::dispatcher::UpdateRequest) {}
    }

    #[test]
    fn register_on_stale_entry_primes_via_lookup_now() {
        let mut cache = StateCache::new();
        let dispatcher = FakeDispatcher { primed: Value::Real(42.0), ..Default::default() };
        let state = State::nullary("battery");
        cache.register_lookup(&state, LookupId(1), 1, &dispatcher).unwrap();
        assert_eq!(*cache.get(&state).unwrap().value(), Value::Real(42.0));
    }

    #[test]
    fn registering_a_tolerance_notifies_dispatcher_of_band() {
        let mut cache = StateCache::new();
        let dispatcher = FakeDispatcher::default();
        let state = State::nullary("temp");
        cache.apply_external_update(&state, Value::Real(10.0), 1, &dispatcher).unwrap();
        cache.register_tolerance(&state, LookupId(1), Some(Value::Real(0.5)), &dispatcher);
        assert_eq!(dispatcher.set_calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn update_notifies_registered_consumers_only_on_change() {
        let mut cache = StateCache::new();
        let dispatcher = FakeDispatcher::default();
        let state = State::nullary("temp");
        cache.register_lookup(&state, LookupId(1), 0, &dispatcher).unwrap();
        let notified = cache.apply_external_update(&state, Value::Real(1.0), 1, &dispatcher).unwrap();
        assert_eq!(notified, vec![LookupId(1)]);
        let notified_again = cache.apply_external_update(&state, Value::Real(1.0), 2, &dispatcher).unwrap();
        assert!(notified_again.is_empty());
    }
}
