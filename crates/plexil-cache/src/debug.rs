//! Debug-pattern message gating (§8 round-trip law: "enable a debug
//! pattern... only the first is observed").
//!
//! The original kernel used a bespoke `DebugMessage` singleton keyed by
//! string pattern. `tracing`'s span/target filtering is the idiomatic Rust
//! equivalent and is already the logging backbone the rest of this crate
//! uses, so `DebugController` is a thin pattern registry layered on top of
//! it rather than a second logging system.

use std::collections::HashSet;
use std::sync::RwLock;

/// Tracks which debug patterns are currently enabled. A pattern is a plain
/// substring match against a message's target, matching the reference
/// behavior of gating on whether a marker string appears in the message.
#[derive(Default)]
pub struct DebugController {
    enabled: RwLock<HashSet<String>>,
}

impl DebugController {
    pub fn new() -> Self {
        DebugController::default()
    }

    pub fn enable(&self, pattern: impl Into<String>) {
        self.enabled.write().expect("debug controller poisoned").insert(pattern.into());
    }

    pub fn disable(&self, pattern: &str) {
        self.enabled.write().expect("debug controller poisoned").remove(pattern);
    }

    pub fn is_enabled(&self, target: &str) -> bool {
        self.enabled
            .read()
            .expect("debug controller poisoned")
            .iter()
            .any(|pattern| target.contains(pattern.as_str()))
    }

    /// Emits `message` via `tracing::debug!` under `target` only if a
    /// currently-enabled pattern matches it. A message for a disabled
    /// pattern is dropped before it ever reaches the `tracing` subscriber.
    pub fn emit(&self, target: &str, message: &str) {
        if self.is_enabled(target) {
            tracing::debug!(target: "plexil_cache::debug", %target, %message, "debug pattern message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabling_a_pattern_silences_further_matches() {
        let ctl = DebugController::new();
        ctl.enable("StateCacheEntry");
        assert!(ctl.is_enabled("StateCacheEntry:update"));
        ctl.disable("StateCacheEntry");
        assert!(!ctl.is_enabled("StateCacheEntry:update"));
    }

    #[test]
    fn unrelated_target_never_matches() {
        let ctl = DebugController::new();
        ctl.enable("Lookup");
        assert!(!ctl.is_enabled("Timebase:tick"));
    }
}
