//! [`State`]: the name+parameters pair that addresses a single piece of
//! external world state, and the key the state cache is keyed on.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A state name paired with its ordered parameter values.
///
/// Two states are equal iff their names and all parameters are equal
/// (typed `Value` equality, so `Integer(1)` and `Real(1.0)` name different
/// states). `State` implements a total order — lexicographic on name, then
/// parameters pairwise — so it can key an ordered map or be deduplicated in
/// a `BTreeMap`-backed cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    name: String,
    parameters: Vec<Value>,
}

impl State {
    pub fn new(name: impl Into<String>, parameters: Vec<Value>) -> Self {
        State { name: name.into(), parameters }
    }

    /// A state with no parameters, e.g. most boolean sensor states.
    pub fn nullary(name: impl Into<String>) -> Self {
        State { name: name.into(), parameters: Vec::new() }
    }

    /// The canonical `time` state: the current wall-clock reading, fed by
    /// the timebase and consulted by `LookupOnChange` on deadlines.
    pub fn time() -> Self {
        State::nullary("time")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.parameters.len() == other.parameters.len()
            && self.parameters.iter().zip(other.parameters.iter()).all(|(a, b)| a == b)
    }
}
impl Eq for State {}

/// Values aren't totally ordered in general (comparing a `Boolean` to a
/// `String` has no answer), but states need a total order to live in a
/// sorted container. Fall back to comparing each parameter's debug
/// rendering when a typed comparison isn't defined; this never affects
/// equality, only iteration/storage order.
impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.name.cmp(&other.name) {
            Ordering::Equal => {}
            ord => return ord,
        }
        for (a, b) in self.parameters.iter().zip(other.parameters.iter()) {
            let ord = a
                .try_cmp(b)
                .unwrap_or_else(|_| format!("{a:?}").cmp(&format!("{b:?}")));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.parameters.len().cmp(&other.parameters.len())
    }
}

impl std::hash::Hash for State {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        for p in &self.parameters {
            format!("{p:?}").hash(state);
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.parameters.is_empty() {
            write!(f, "(")?;
            for (i, p) in self.parameters.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{p:?}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn equal_name_and_parameters_are_equal_states() {
        let a = State::new("temp", vec![Value::String("probe1".into())]);
        let b = State::new("temp", vec![Value::String("probe1".into())]);
        assert_eq!(a, b);
    }

    #[test]
    fn differing_parameter_makes_states_unequal() {
        let a = State::new("temp", vec![Value::String("probe1".into())]);
        let b = State::new("temp", vec![Value::String("probe2".into())]);
        assert_ne!(a, b);
    }

    #[test]
    fn ordering_is_lexicographic_on_name_then_parameters() {
        let a = State::new("alpha", vec![]);
        let b = State::new("beta", vec![]);
        assert!(a < b);

        let c = State::new("temp", vec![Value::Integer(1)]);
        let d = State::new("temp", vec![Value::Integer(2)]);
        assert!(c < d);
    }

    #[test]
    fn round_trip_through_json_preserves_equality() {
        let s = State::new("temp", vec![Value::Real(3.5), Value::String("probe".into())]);
        let json = serde_json::to_string(&s).unwrap();
        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
