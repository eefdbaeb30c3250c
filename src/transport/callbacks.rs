//! Callbacks handed to a running transport
//!
//! These replace direct state mutation from the network thread: each callback
//! turns its arguments into an immutable [`TransportEvent`], tags it with the
//! session it belongs to, and enqueues it for the controller. Enqueueing never
//! blocks, so the network loop is held up only for the length of a channel send.

use super::{ConnectResult, DisconnectReason, InboundMessage, LogLevel, TransportEvent};
use tokio::sync::mpsc;

/// Transport event tagged with the connect attempt that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: u64,
    pub event: TransportEvent,
}

/// Event sink bound to one connect attempt
#[derive(Debug, Clone)]
pub struct TransportCallbacks {
    session: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl TransportCallbacks {
    pub fn new(session: u64, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, events }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn on_connect(&self, result: ConnectResult) {
        self.emit(TransportEvent::Connect(result));
    }

    pub fn on_disconnect(&self, reason: DisconnectReason) {
        self.emit(TransportEvent::Disconnect(reason));
    }

    pub fn on_message(&self, message: InboundMessage) {
        self.emit(TransportEvent::Message(message));
    }

    pub fn on_subscribe_rejected(&self, topic: impl Into<String>) {
        self.emit(TransportEvent::SubscribeRejected {
            topic: topic.into(),
        });
    }

    pub fn on_log(&self, level: LogLevel, text: impl Into<String>) {
        self.emit(TransportEvent::Log {
            level,
            text: text.into(),
        });
    }

    /// Enqueue an already-built event
    pub fn emit(&self, event: TransportEvent) {
        // A closed channel means the controller is gone; nothing left to notify.
        let _ = self.events.send(SessionEvent {
            session: self.session,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::QoS;

    #[test]
    fn test_events_are_tagged_with_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callbacks = TransportCallbacks::new(7, tx);

        callbacks.on_connect(ConnectResult::Success);
        callbacks.on_message(InboundMessage::new("a/b", "x", QoS::AtMostOnce, false));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.session, 7);
        assert_eq!(first.event, TransportEvent::Connect(ConnectResult::Success));

        let second = rx.try_recv().unwrap();
        assert_eq!(second.session, 7);
        assert!(matches!(second.event, TransportEvent::Message(ref m) if m.topic == "a/b"));
    }

    #[test]
    fn test_order_is_preserved() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callbacks = TransportCallbacks::new(1, tx);

        for i in 0..20 {
            callbacks.on_message(InboundMessage::new(
                format!("t/{i}"),
                "",
                QoS::AtMostOnce,
                false,
            ));
        }

        for i in 0..20 {
            let event = rx.try_recv().unwrap();
            assert!(
                matches!(event.event, TransportEvent::Message(ref m) if m.topic == format!("t/{i}"))
            );
        }
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let callbacks = TransportCallbacks::new(1, tx);
        callbacks.on_log(LogLevel::Info, "still fine");
    }
}
