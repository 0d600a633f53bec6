//! [`StateCacheEntry`]: the typed, timestamped, threshold-aware storage
//! slot a [`crate::state_cache::StateCache`] keeps per [`State`](plexil_value::State).

use std::collections::{HashMap, HashSet};

use plexil_value::{Value, ValueType};

use crate::error::{CacheError, Result};

/// Relative epsilon applied only when deciding whether a `Real` value has
/// crossed its threshold band — never when comparing raw values for cache
/// update equality. See `CacheConfig::real_epsilon`.
pub const DEFAULT_REAL_EPSILON: f64 = 1e-13;

/// Opaque identifier for a registered `Lookup` consumer. `plexil-cache`
/// never sees the `Lookup` expression itself — only this handle and, for
/// change-lookups, the tolerance it registers — so the cache has no
/// dependency on the expression graph crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LookupId(pub u64);

/// The derived notification band an entry's registered change-lookups
/// agree on. Only ever present for numeric entries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdBand {
    Integer { low: i64, high: i64 },
    Real { low: f64, high: f64 },
}

impl ThresholdBand {
    /// Whether `value` falls outside this band — the condition under which
    /// the external world is obligated to notify the cache. The `epsilon`
    /// guard only applies to the `Real` arm (§4.C / §9 open question: the
    /// epsilon is a threshold-crossing concern, never an equality concern).
    pub fn is_exceeded(&self, value: &Value, epsilon: f64) -> bool {
        match (self, value) {
            (ThresholdBand::Integer { low, high }, Value::Integer(v)) => v < low || v > high,
            (ThresholdBand::Real { low, high }, _) => {
                let Some(v) = value.as_f64() else { return true };
                let guard = epsilon * v.abs();
                v < low - guard || v > high + guard
            }
            // A band exists only while the entry is numeric; any other
            // shape here means the entry's type changed underneath it.
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
struct ToleranceRegistration {
    /// The value the band was last centered on. Refreshed whenever
    /// thresholds are recomputed (registration, deregistration, tolerance
    /// change, or a crossing) — not on every cache write, mirroring the
    /// reference behavior where a `LookupOnChange` only resubmits its
    /// "last reported value" when it has something new to report.
    last_observed: Value,
    /// `None` means an Unknown tolerance: treated as zero and forces
    /// unconditional notification (the band collapses to a point).
    tolerance: Option<Value>,
}

/// What happened to an entry's notification band as a result of an
/// operation. The caller (`StateCache`) uses this to decide whether to call
/// the dispatcher's `setThresholds` / `clearThresholds`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdChange {
    Unchanged,
    Set,
    Cleared,
}

/// The outcome of a write (`update` or `set_unknown`): whether the cached
/// value actually changed, and whether the live threshold band was crossed
/// (meaning the dispatcher needs to be told about both the value and the
/// new band).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteOutcome {
    pub changed: bool,
    pub threshold_change: ThresholdChange,
}

/// Holds, for one `State`, the cache's current typed value plus the
/// bookkeeping needed to dedupe reads and derive a notification band:
/// registered lookup consumers (for "notify everyone on change") and
/// registered tolerances (for the aggregate band).
///
/// Type is monotone per the invariant in §3: it starts `Unknown`, may
/// become concrete, and may narrow `Integer` → `Real`, but never crosses
/// between unrelated concrete types — attempting that is a runtime
/// assertion ([`CacheError::TypeMismatch`]).
#[derive(Debug)]
pub struct StateCacheEntry {
    state_name: String,
    value: Value,
    timestamp: u64,
    consumers: HashSet<LookupId>,
    tolerances: HashMap<LookupId, ToleranceRegistration>,
    thresholds: Option<ThresholdBand>,
}

impl StateCacheEntry {
    pub fn new(state_name: impl Into<String>) -> Self {
        StateCacheEntry {
            state_name: state_name.into(),
            value: Value::unknown(ValueType::Unknown),
            timestamp: 0,
            consumers: HashSet::new(),
            tolerances: HashMap::new(),
            thresholds: None,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn thresholds(&self) -> Option<ThresholdBand> {
        self.thresholds
    }

    /// True when the entry hasn't been refreshed since `cycle` began — the
    /// condition under which `registerLookup` must synchronously call
    /// `lookupNow` before returning.
    pub fn is_stale(&self, cycle: u64) -> bool {
        self.timestamp < cycle
    }

    pub fn has_consumers(&self) -> bool {
        !self.consumers.is_empty()
    }

    /// Registers a plain (non-change) or change-lookup consumer. Callers
    /// that also need the tolerance-derived band must follow with
    /// [`Self::register_tolerance`].
    pub fn register_lookup(&mut self, id: LookupId) {
        self.consumers.insert(id);
    }

    /// Removes a consumer and its tolerance registration (if any),
    /// recomputing the band. Returns the resulting [`ThresholdChange`] so
    /// the caller can tell the dispatcher.
    pub fn unregister_lookup(&mut self, id: LookupId) -> ThresholdChange {
        self.consumers.remove(&id);
        if self.tolerances.remove(&id).is_some() {
            self.recompute_thresholds()
        } else {
            ThresholdChange::Unchanged
        }
    }

    /// Registers or updates a change-lookup's tolerance demand and
    /// recomputes the aggregate band.
    pub fn register_tolerance(&mut self, id: LookupId, tolerance: Option<Value>) -> ThresholdChange {
        self.tolerances.insert(
            id,
            ToleranceRegistration { last_observed: self.value.clone(), tolerance },
        );
        self.recompute_thresholds()
    }

    pub fn unregister_tolerance(&mut self, id: LookupId) -> ThresholdChange {
        if self.tolerances.remove(&id).is_some() {
            self.recompute_thresholds()
        } else {
            ThresholdChange::Unchanged
        }
    }

    /// low = max_i(v_i - |t_i|), high = min_i(v_i + |t_i|); an Unknown
    /// tolerance is treated as zero, collapsing that lookup's contribution
    /// to a point band and forcing unconditional notification on any
    /// change. No registrations (or a non-numeric entry) clears the band.
    fn recompute_thresholds(&mut self) -> ThresholdChange {
        let had_band = self.thresholds.is_some();
        if self.tolerances.is_empty() || !self.value.value_type().is_numeric() {
            self.thresholds = None;
            return if had_band { ThresholdChange::Cleared } else { ThresholdChange::Unchanged };
        }

        let is_integer_only = self.value.value_type() == ValueType::Integer
            && self.tolerances.values().all(|r| matches!(r.tolerance, Some(Value::Integer(_)) | None));

        let new_band = if is_integer_only {
            let mut low = i64::MIN;
            let mut high = i64::MAX;
            for reg in self.tolerances.values() {
                let v = reg.last_observed.as_i64().unwrap_or(0);
                let t = match &reg.tolerance {
                    Some(t) => t.as_i64().unwrap_or(0).abs(),
                    None => 0,
                };
                low = low.max(v.saturating_sub(t));
                high = high.min(v.saturating_add(t));
            }
            ThresholdBand::Integer { low, high }
        } else {
            let mut low = f64::MIN;
            let mut high = f64::MAX;
            for reg in self.tolerances.values() {
                let v = reg.last_observed.as_f64().unwrap_or(0.0);
                let t = match &reg.tolerance {
                    Some(t) => t.as_f64().unwrap_or(0.0).abs(),
                    None => 0.0,
                };
                low = low.max(v - t);
                high = high.min(v + t);
            }
            ThresholdBand::Real { low, high }
        };

        let changed = self.thresholds != Some(new_band);
        self.thresholds = Some(new_band);
        if changed {
            ThresholdChange::Set
        } else {
            ThresholdChange::Unchanged
        }
    }

    fn check_type_compatible(&self, incoming: ValueType) -> Result<ValueType> {
        let existing = self.value.value_type();
        if existing == incoming || existing == ValueType::Unknown {
            return Ok(incoming);
        }
        if incoming == ValueType::Unknown {
            return Ok(existing);
        }
        if existing.is_numeric() && incoming.is_numeric() {
            // Integer is storable in any numeric slot; Real is the wider
            // representation, so a mismatch resolves to Real.
            return Ok(if existing == ValueType::Real || incoming == ValueType::Real {
                ValueType::Real
            } else {
                ValueType::Integer
            });
        }
        Err(CacheError::TypeMismatch { state: self.state_name.clone(), existing, incoming })
    }

    /// Writes a new value at `timestamp`. Stores and notifies only if the
    /// value differs from the cached one by typed equality (`Real`
    /// compared bitwise, per §4.C). A crossing of the live band triggers a
    /// recompute and is surfaced via the returned [`ThresholdChange`].
    pub fn update(&mut self, incoming: Value, timestamp: u64) -> Result<WriteOutcome> {
        let resolved_type = self.check_type_compatible(incoming.value_type())?;
        let coerced = coerce_to(incoming, resolved_type);

        let changed = coerced != self.value;
        if !changed {
            self.timestamp = timestamp;
            return Ok(WriteOutcome { changed: false, threshold_change: ThresholdChange::Unchanged });
        }

        let crossed = self
            .thresholds
            .map(|band| band.is_exceeded(&coerced, DEFAULT_REAL_EPSILON))
            .unwrap_or(false);

        self.value = coerced;
        self.timestamp = timestamp;

        let threshold_change = if crossed || self.thresholds.is_none() && !self.tolerances.is_empty() {
            for reg in self.tolerances.values_mut() {
                reg.last_observed = self.value.clone();
            }
            self.recompute_thresholds()
        } else {
            ThresholdChange::Unchanged
        };

        Ok(WriteOutcome { changed: true, threshold_change })
    }

    /// Symmetric with [`Self::update`]: marks the entry Unknown at
    /// `timestamp`, which always clears any live threshold band (an
    /// unknown value can't be said to be inside or outside a band).
    pub fn set_unknown(&mut self, timestamp: u64) -> WriteOutcome {
        let declared_type = self.value.value_type();
        let unknown = Value::unknown(declared_type);
        let changed = unknown != self.value;
        self.value = unknown;
        self.timestamp = timestamp;
        let had_band = self.thresholds.take().is_some();
        WriteOutcome {
            changed,
            threshold_change: if had_band { ThresholdChange::Cleared } else { ThresholdChange::Unchanged },
        }
    }

    pub fn consumers(&self) -> impl Iterator<Item = &LookupId> {
        self.consumers.iter()
    }
}

fn coerce_to(value: Value, ty: ValueType) -> Value {
    match (ty, &value) {
        (ValueType::Real, Value::Integer(i)) => Value::Real(*i as f64),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_unknown() {
        let entry = StateCacheEntry::new("temp");
        assert!(!entry.value().is_known());
        assert_eq!(entry.timestamp(), 0);
    }

    #[test]
    fn update_with_same_value_does_not_report_changed() {
        let mut entry = StateCacheEntry::new("temp");
        entry.update(Value::Real(10.0), 1).unwrap();
        let outcome = entry.update(Value::Real(10.0), 2).unwrap();
        assert!(!outcome.changed);
        assert_eq!(entry.timestamp(), 2);
    }

    #[test]
    fn integer_to_real_narrowing_is_allowed() {
        let mut entry = StateCacheEntry::new("x");
        entry.update(Value::Integer(3), 1).unwrap();
        let outcome = entry.update(Value::Real(3.5), 2).unwrap();
        assert!(outcome.changed);
        assert_eq!(*entry.value(), Value::Real(3.5));
    }

    #[test]
    fn unrelated_type_change_is_a_type_mismatch() {
        let mut entry = StateCacheEntry::new("x");
        entry.update(Value::Boolean(true), 1).unwrap();
        let err = entry.update(Value::String("oops".into()), 2).unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch { .. }));
    }

    #[test]
    fn threshold_band_is_intersection_of_registered_tolerances() {
        let mut entry = StateCacheEntry::new("temp");
        entry.update(Value::Real(10.0), 1).unwrap();
        entry.register_tolerance(LookupId(1), Some(Value::Real(2.0)));
        entry.register_tolerance(LookupId(2), Some(Value::Real(0.5)));
        match entry.thresholds().unwrap() {
            ThresholdBand::Real { low, high } => {
                assert!((low - 9.5).abs() < 1e-9);
                assert!((high - 10.5).abs() < 1e-9);
            }
            _ => panic!("expected real band"),
        }
    }

    #[test]
    fn unregistering_last_tolerance_clears_the_band() {
        let mut entry = StateCacheEntry::new("temp");
        entry.update(Value::Real(10.0), 1).unwrap();
        entry.register_tolerance(LookupId(1), Some(Value::Real(2.0)));
        let change = entry.unregister_tolerance(LookupId(1));
        assert_eq!(change, ThresholdChange::Cleared);
        assert!(entry.thresholds().is_none());
    }

    #[test]
    fn unknown_tolerance_collapses_band_to_a_point() {
        let mut entry = StateCacheEntry::new("temp");
        entry.update(Value::Real(10.0), 1).unwrap();
        entry.register_tolerance(LookupId(1), None);
        match entry.thresholds().unwrap() {
            ThresholdBand::Real { low, high } => {
                assert_eq!(low, 10.0);
                assert_eq!(high, 10.0);
            }
            _ => panic!("expected real band"),
        }
    }

    #[test]
    fn real_threshold_crossing_uses_relative_epsilon() {
        let band = ThresholdBand::Real { low: 9.5, high: 10.5 };
        // Comfortably inside.
        assert!(!band.is_exceeded(&Value::Real(10.4), DEFAULT_REAL_EPSILON));
        // A femtoscale rounding wobble just past `high` must not count as
        // a crossing, per the epsilon guard.
        let wobble = 10.5 + 10.5 * 1e-14;
        assert!(!band.is_exceeded(&Value::Real(wobble), DEFAULT_REAL_EPSILON));
        // A real crossing is still reported.
        assert!(band.is_exceeded(&Value::Real(11.0), DEFAULT_REAL_EPSILON));
    }

    #[test]
    fn integer_threshold_crossing_has_no_epsilon_guard() {
        let band = ThresholdBand::Integer { low: 5, high: 10 };
        assert!(band.is_exceeded(&Value::Integer(11), DEFAULT_REAL_EPSILON));
        assert!(!band.is_exceeded(&Value::Integer(10), DEFAULT_REAL_EPSILON));
    }
}

#[cfg(test)]
mod threshold_proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The aggregate band is the intersection of every registered
        /// tolerance's own band around the last observed value, so the
        /// center point itself can never lie outside the resulting band —
        /// no combination of non-negative tolerances should ever report the
        /// value it was just centered on as a crossing.
        #[test]
        fn center_value_never_exceeds_its_own_band(
            center in -1000.0f64..1000.0,
            tolerances in prop::collection::vec(0.0f64..50.0, 1..6),
        ) {
            let mut entry = StateCacheEntry::new("probe");
            entry.update(Value::Real(center), 1).unwrap();
            for (i, t) in tolerances.iter().enumerate() {
                entry.register_tolerance(LookupId(i as u64), Some(Value::Real(*t)));
            }
            let band = entry.thresholds().expect("tolerances were registered");
            prop_assert!(!band.is_exceeded(&Value::Real(center), DEFAULT_REAL_EPSILON));
        }

        /// Unregistering every tolerance that was registered always clears
        /// the band, regardless of how many were registered or in what
        /// order they're removed.
        #[test]
        fn removing_every_tolerance_clears_the_band(
            tolerances in prop::collection::vec(0.0f64..50.0, 1..6),
        ) {
            let mut entry = StateCacheEntry::new("probe");
            entry.update(Value::Real(10.0), 1).unwrap();
            for (i, t) in tolerances.iter().enumerate() {
                entry.register_tolerance(LookupId(i as u64), Some(Value::Real(*t)));
            }
            for i in 0..tolerances.len() {
                entry.unregister_tolerance(LookupId(i as u64));
            }
            prop_assert!(entry.thresholds().is_none());
        }
    }
}
