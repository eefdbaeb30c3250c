//! Notifications delivered to the application
//!
//! The controller hands every outcome to a [`Dispatcher`], which enqueues it
//! on an unbounded channel. The application drains the receiving end on its
//! own task, so nothing it does can stall the controller or the network loop.

use crate::transport::InboundMessage;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// What kind of failure a [`Notification::ConnectionFailed`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Credentials rejected; no retry
    Auth,
    /// Broker refused for another reason; no retry
    Refused,
    /// Network or protocol failure; retry armed
    Transport,
    /// Subscribe request failed. Shares this channel with connection
    /// failures.
    Subscribe,
    /// Retry budget used up; controller is Disconnected
    RetryExhausted,
}

/// Event surfaced to the application sink
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Connected,
    Disconnected,
    ConnectionFailed { kind: FailureKind, reason: String },
    /// Inbound message that passed the filter
    MessageReceived(InboundMessage),
}

impl Notification {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        Notification::ConnectionFailed {
            kind,
            reason: reason.into(),
        }
    }

    /// Failure after which the controller stays Disconnected until the
    /// application calls `connect` again
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            Notification::ConnectionFailed {
                kind: FailureKind::Auth | FailureKind::Refused | FailureKind::RetryExhausted,
                ..
            }
        )
    }
}

/// Sending side of the notification channel
#[derive(Debug, Clone)]
pub struct Dispatcher {
    sink: mpsc::UnboundedSender<Notification>,
}

impl Dispatcher {
    /// Create a dispatcher and the receiver the application drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sink, receiver) = mpsc::unbounded_channel();
        (Self { sink }, receiver)
    }

    /// Enqueue a notification. Returns false once the application has
    /// dropped its receiver.
    pub fn notify(&self, notification: Notification) -> bool {
        trace!(?notification, "Dispatching notification");
        match self.sink.send(notification) {
            Ok(()) => true,
            Err(_) => {
                debug!("Notification receiver dropped, discarding");
                false
            }
        }
    }

    pub fn connected(&self) -> bool {
        self.notify(Notification::Connected)
    }

    pub fn disconnected(&self) -> bool {
        self.notify(Notification::Disconnected)
    }

    pub fn failed(&self, kind: FailureKind, reason: impl Into<String>) -> bool {
        self.notify(Notification::failed(kind, reason))
    }

    pub fn message(&self, message: InboundMessage) -> bool {
        self.notify(Notification::MessageReceived(message))
    }
}
