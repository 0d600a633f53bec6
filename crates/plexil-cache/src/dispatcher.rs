//! The outbound (kernel → external world) half of the facade described in
//! §4.I: a stateless `Dispatcher` the exec driver calls into for lookups,
//! threshold advisories, and command/update dispatch.

use plexil_value::{State, Value};

/// Identifies a single dispatched command across its `executeCommand` /
/// `invokeAbort` / return-handle lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub u64);

/// Identifies a single dispatched planner update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpdateId(pub u64);

/// Identifies an in-flight message handle assigned by `assignMessageHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageHandle(pub u64);

/// The wire-level shape of a Command node's outbound intent: enough for a
/// `Dispatcher` to act on. The richer node-side record (resource
/// priority/bounds, return-handle wiring) lives above this crate and is
/// projected down to a `CommandRequest` at dispatch time.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub id: CommandId,
    pub name: String,
    pub args: Vec<Value>,
}

/// The wire-level shape of an Update node's outbound intent.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub id: UpdateId,
    pub pairs: Vec<(String, Value)>,
}

/// The kernel's only window onto the outside world for writes and lookup
/// priming. Implementations are expected to be fast and non-blocking where
/// possible; `lookup_now` in particular may be called synchronously from
/// inside a macro step (§5: "it is expected to be fast").
///
/// All methods take `&self`: per the single-threaded discipline of §5, only
/// the exec thread ever calls a `Dispatcher`, so no internal locking is
/// required by this trait's contract (an implementation is free to use its
/// own if it fans out to other threads internally).
pub trait Dispatcher: Send + Sync {
    /// Synchronous lookup priming: fills in the current value for `state`,
    /// or reports it Unknown. Implementations that can't answer
    /// immediately should still return promptly — a lookup that blocks
    /// here blocks the whole macro step.
    fn lookup_now(&self, state: &State) -> Value;

    /// Advisory: the cache no longer needs to be told about changes to
    /// `state` within `[low, high]`.
    fn set_thresholds(&self, state: &State, low: Value, high: Value);

    /// Advisory: the cache needs every change to `state`, or its threshold
    /// band no longer applies.
    fn clear_thresholds(&self, state: &State);

    fn execute_command(&self, cmd: &CommandRequest);

    fn invoke_abort(&self, cmd: &CommandRequest);

    /// The losing side of an assignment/command conflict resolution (§4.H).
    fn report_command_arbitration_failure(&self, cmd: &CommandRequest);

    fn execute_update(&self, update: &UpdateRequest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        calls: Mutex<Vec<String>>,
    }

    impl Dispatcher for RecordingDispatcher {
        fn lookup_now(&self, state: &State) -> Value {
            self.calls.lock().unwrap().push(format!("lookup_now({state})"));
            Value::unknown(plexil_value::ValueType::Real)
        }
        fn set_thresholds(&self, state: &State, _low: Value, _high: Value) {
            self.calls.lock().unwrap().push(format!("set_thresholds({state})"));
        }
        fn clear_thresholds(&self, state: &State) {
            self.calls.lock().unwrap().push(format!("clear_thresholds({state})"));
        }
        fn execute_command(&self, cmd: &CommandRequest) {
            self.calls.lock().unwrap().push(format!("execute_command({})", cmd.name));
        }
        fn invoke_abort(&self, cmd: &CommandRequest) {
            self.calls.lock().unwrap().push(format!("invoke_abort({})", cmd.name));
        }
        fn report_command_arbitration_failure(&self, cmd: &CommandRequest) {
            self.calls.lock().unwrap().push(format!("arbitration_failure({})", cmd.name));
        }
        fn execute_update(&self, update: &UpdateRequest) {
            self.calls.lock().unwrap().push(format!("execute_update({})", update.pairs.len()));
        }
    }

    #[test]
    fn dispatcher_trait_is_object_safe_and_callable() {
        let d: Box<dyn Dispatcher> = Box::new(RecordingDispatcher::default());
        d.lookup_now(&State::time());
        d.clear_thresholds(&State::time());
    }
}
