//! Pure lifecycle decisions for the connection controller
//!
//! Given a transport outcome or a timer fire, these functions say what the
//! controller should do next. They hold no state and perform no I/O apart
//! from logging, which keeps the state machine testable without a broker.

use super::connection::{ConnectionState, RetryState};
use super::dispatch::FailureKind;
use crate::error::ClientError;
use crate::transport::{ConnectResult, DisconnectReason};
use tracing::{error, info, warn};

/// What the controller does after a connect or disconnect callback
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Session is up: reset retries, clear retained topics, notify Connected
    Established,
    /// Terminal for this Connect call: go Disconnected without retrying
    GiveUp { kind: FailureKind, error: ClientError },
    /// Go Reconnecting and arm the retry timer
    Retry { reason: String },
    /// Application-initiated disconnect finished
    Closed,
}

/// Decision taken when the retry timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the connect sequence again
    Attempt { attempt: u32 },
    /// Budget used up; emit RetryExhausted and stop
    Exhausted { max_retry: u32 },
}

/// Lifecycle policy
pub struct RetryPolicy;

impl RetryPolicy {
    /// Classify an `on_connect` result code (pure function)
    pub fn on_connect(result: &ConnectResult) -> Disposition {
        match result {
            ConnectResult::Success => Disposition::Established,
            ConnectResult::AuthFailed => Disposition::GiveUp {
                kind: FailureKind::Auth,
                error: ClientError::Auth("broker rejected the credentials".to_string()),
            },
            ConnectResult::Refused(code) => Disposition::GiveUp {
                kind: FailureKind::Refused,
                error: ClientError::Refused(code.clone()),
            },
            ConnectResult::Failed(text) => Disposition::Retry {
                reason: text.clone(),
            },
        }
    }

    /// Classify an `on_disconnect` reason code (pure function)
    pub fn on_disconnect(reason: &DisconnectReason) -> Disposition {
        match reason {
            DisconnectReason::Graceful => Disposition::Closed,
            DisconnectReason::KeepaliveTimeout => Disposition::Retry {
                reason: "keepalive timeout".to_string(),
            },
            DisconnectReason::Unexpected(text) => Disposition::Retry {
                reason: format!("connection lost: {text}"),
            },
        }
    }

    /// Count a timer fire and decide whether another attempt is allowed
    pub fn next_attempt(retry: &mut RetryState) -> RetryDecision {
        let attempt = retry.record_fire();
        if retry.is_exhausted() {
            RetryDecision::Exhausted {
                max_retry: retry.max_retry,
            }
        } else {
            RetryDecision::Attempt { attempt }
        }
    }

    /// Publish and subscribe are only forwarded while Connected
    pub fn can_send(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Reconnecting, ConnectionState::Connected) => {
                info!("Reconnection successful");
            }
            (ConnectionState::Connected, ConnectionState::Reconnecting) => {
                warn!("MQTT connection lost, waiting to reconnect");
            }
            (ConnectionState::Connecting, ConnectionState::Reconnecting) => {
                warn!("MQTT connect attempt failed, waiting to retry");
            }
            (_, ConnectionState::Disconnected) => {
                info!("MQTT connection state: {:?} -> Disconnected", from);
            }
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }

    /// Log a terminal failure
    pub fn log_give_up(kind: FailureKind, error: &ClientError) {
        error!(?kind, "MQTT connection failed permanently: {}", error);
    }
}
