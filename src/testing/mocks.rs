//! Mock broker transport
//!
//! [`MockTransport`] records every call the controller makes and replays
//! scripted connect outcomes when the controller starts its loop. Clones
//! share state, so a test keeps one clone and hands the other to the client.

use crate::transport::{
    BrokerTransport, ConnectResult, Credentials, DisconnectReason, InboundMessage, LogLevel, QoS,
    TlsFiles, TransportCallbacks, TransportError, TransportEvent,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One recorded transport operation
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    SetCredentials(Option<Credentials>),
    SetTls(Option<TlsFiles>),
    Connect {
        host: String,
        port: u16,
        keepalive: Duration,
    },
    StartLoop {
        session: u64,
    },
    Disconnect,
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    },
    StopLoop,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<TransportCall>,
    scripted: VecDeque<ConnectResult>,
    default_outcome: Option<ConnectResult>,
    callbacks: Option<TransportCallbacks>,
    fail_connect: bool,
    fail_start_loop: bool,
    fail_subscribe: bool,
    fail_publish: bool,
    fail_tls: bool,
}

/// Scripted, recording [`BrokerTransport`]
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Transport whose broker accepts every connection
    pub fn new() -> Self {
        Self::with_default_outcome(Some(ConnectResult::Success))
    }

    /// Transport that reports nothing on its own; the test drives every event
    pub fn manual() -> Self {
        Self::with_default_outcome(None)
    }

    /// Transport whose broker never answers successfully
    pub fn unreachable() -> Self {
        Self::with_default_outcome(Some(ConnectResult::Failed(
            "connection refused".to_string(),
        )))
    }

    pub fn with_default_outcome(outcome: Option<ConnectResult>) -> Self {
        let mock = Self::default();
        mock.lock().default_outcome = outcome;
        mock
    }

    /// Queue outcomes for the next loop starts, ahead of the default
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = ConnectResult>) {
        self.lock().scripted.extend(outcomes);
    }

    pub fn set_default_outcome(&self, outcome: Option<ConnectResult>) {
        self.lock().default_outcome = outcome;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    pub fn fail_start_loop(&self, fail: bool) {
        self.lock().fail_start_loop = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    pub fn fail_publish(&self, fail: bool) {
        self.lock().fail_publish = fail;
    }

    pub fn fail_tls(&self, fail: bool) {
        self.lock().fail_tls = fail;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn connect_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, TransportCall::Connect { .. }))
            .count()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Publish { topic, payload, .. } => {
                    Some((topic.clone(), payload.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe { topic, .. } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    /// Callbacks of the loop that is currently running
    pub fn current_callbacks(&self) -> Option<TransportCallbacks> {
        self.lock().callbacks.clone()
    }

    /// Send an event through the running loop's callbacks. Returns false when
    /// no loop is running.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.current_callbacks() {
            Some(callbacks) => {
                callbacks.emit(event);
                true
            }
            None => false,
        }
    }

    pub fn accept_connection(&self) -> bool {
        self.emit(TransportEvent::Connect(ConnectResult::Success))
    }

    pub fn drop_connection(&self, reason: DisconnectReason) -> bool {
        self.emit(TransportEvent::Disconnect(reason))
    }

    pub fn deliver(&self, message: InboundMessage) -> bool {
        self.emit(TransportEvent::Message(message))
    }

    pub fn reject_subscription(&self, topic: &str) -> bool {
        self.emit(TransportEvent::SubscribeRejected {
            topic: topic.to_string(),
        })
    }

    pub fn log(&self, level: LogLevel, text: &str) -> bool {
        self.emit(TransportEvent::Log {
            level,
            text: text.to_string(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BrokerTransport for MockTransport {
    fn set_credentials(
        &mut self,
        credentials: Option<&Credentials>,
    ) -> Result<(), TransportError> {
        self.lock()
            .calls
            .push(TransportCall::SetCredentials(credentials.cloned()));
        Ok(())
    }

    fn set_tls(&mut self, tls: Option<&TlsFiles>) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::SetTls(tls.cloned()));
        if state.fail_tls && tls.is_some() {
            return Err(TransportError::Tls("mock TLS failure".to_string()));
        }
        Ok(())
    }

    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        keepalive: Duration,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::Connect {
            host: host.to_string(),
            port,
            keepalive,
        });
        if state.fail_connect {
            return Err(TransportError::Connect("mock connect failure".to_string()));
        }
        Ok(())
    }

    fn start_loop(&mut self, callbacks: TransportCallbacks) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::StartLoop {
            session: callbacks.session(),
        });
        if state.fail_start_loop {
            return Err(TransportError::Loop("mock loop failure".to_string()));
        }

        let outcome = state
            .scripted
            .pop_front()
            .or_else(|| state.default_outcome.clone());
        if let Some(result) = outcome {
            callbacks.on_connect(result);
        }
        state.callbacks = Some(callbacks);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::Disconnect);
        if let Some(callbacks) = &state.callbacks {
            callbacks.on_disconnect(DisconnectReason::Graceful);
        }
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        if state.fail_subscribe {
            return Err(TransportError::Request(format!(
                "mock subscribe failure for {topic}"
            )));
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        if state.fail_publish {
            return Err(TransportError::Request(format!(
                "mock publish failure for {topic}"
            )));
        }
        Ok(())
    }

    async fn stop_loop(&mut self) {
        let mut state = self.lock();
        state.calls.push(TransportCall::StopLoop);
        state.callbacks = None;
    }
}
