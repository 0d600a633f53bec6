//! The inbound (external world → kernel) half of the facade: an
//! [`ExternalInterface`] that stages calls from arbitrary threads into a
//! queue the exec thread drains at the top of every macro step (§4.I, §5).

use std::collections::VecDeque;
use std::sync::Mutex;

use plexil_value::{State, Value};
use tokio::sync::Notify;

use crate::dispatcher::{CommandId, MessageHandle, UpdateId};

/// One inbound item. These carry exactly the payload `plexil-exec` needs
/// to route the reply — never a pointer into the expression graph or node
/// arena, since `plexil-cache` doesn't depend on either.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    LookupReturn { state: State, value: Value },
    CommandReturn { command: CommandId, value: Value },
    CommandHandleReturn { command: CommandId, handle: plexil_value::CommandHandle },
    CommandAbortAcknowledge { command: CommandId, ok: bool },
    AcknowledgeUpdate { update: UpdateId, ok: bool },
    MessageReceived { message: String },
    MessageQueueEmpty,
    AssignMessageHandle { message: String, handle: MessageHandle },
    ReleaseMessageHandle { handle: MessageHandle },
}

/// Thread-safe mailbox the exec thread drains every macro step. Calling any
/// of these methods never touches the node state machine or expression
/// graph directly — it only appends to `queue` and wakes the exec thread
/// through `signal`, mirroring the "enqueue into the cache or into
/// per-command mailbox slots" contract of §4.I.
#[derive(Default)]
pub struct ExternalInterface {
    queue: Mutex<VecDeque<InboundEvent>>,
    signal: Notify,
}

impl ExternalInterface {
    pub fn new() -> Self {
        ExternalInterface { queue: Mutex::new(VecDeque::new()), signal: Notify::new() }
    }

    fn push(&self, event: InboundEvent) {
        self.queue.lock().expect("external interface queue poisoned").push_back(event);
        self.signal.notify_one();
    }

    pub fn lookup_return(&self, state: State, value: Value) {
        self.push(InboundEvent::LookupReturn { state, value });
    }

    pub fn command_return(&self, command: CommandId, value: Value) {
        self.push(InboundEvent::CommandReturn { command, value });
    }

    pub fn command_handle_return(&self, command: CommandId, handle: plexil_value::CommandHandle) {
        self.push(InboundEvent::CommandHandleReturn { command, handle });
    }

    pub fn command_abort_acknowledge(&self, command: CommandId, ok: bool) {
        self.push(InboundEvent::CommandAbortAcknowledge { command, ok });
    }

    pub fn acknowledge_update(&self, update: UpdateId, ok: bool) {
        self.push(InboundEvent::AcknowledgeUpdate { update, ok });
    }

    pub fn message_received(&self, message: String) {
        self.push(InboundEvent::MessageReceived { message });
    }

    pub fn message_queue_empty(&self) {
        self.push(InboundEvent::MessageQueueEmpty);
    }

    pub fn assign_message_handle(&self, message: String, handle: MessageHandle) {
        self.push(InboundEvent::AssignMessageHandle { message, handle });
    }

    pub fn release_message_handle(&self, handle: MessageHandle) {
        self.push(InboundEvent::ReleaseMessageHandle { handle });
    }

    /// Drains everything currently queued — called by the exec driver at
    /// the top of a macro step ("drain all inbound updates" in §4.H).
    pub fn drain(&self) -> Vec<InboundEvent> {
        let mut queue = self.queue.lock().expect("external interface queue poisoned");
        queue.drain(..).collect()
    }

    /// Waits until at least one event is pending, for a driver that wants
    /// to block between macro steps rather than poll.
    pub async fn wait_for_event(&self) {
        if self.queue.lock().expect("external interface queue poisoned").is_empty() {
            self.signal.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_events_in_arrival_order() {
        let iface = ExternalInterface::new();
        iface.lookup_return(State::nullary("a"), Value::Boolean(true));
        iface.lookup_return(State::nullary("b"), Value::Boolean(false));
        let events = iface.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], InboundEvent::LookupReturn { state, .. } if state.name() == "a"));
        assert!(iface.drain().is_empty());
    }

    #[tokio::test]
    async fn wait_for_event_resolves_once_something_is_pushed() {
        let iface = std::sync::Arc::new(ExternalInterface::new());
        let waiter = iface.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_event().await;
        });
        iface.message_received("hello".into());
        handle.await.unwrap();
    }
}
