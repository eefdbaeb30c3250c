//! rumqttc-backed broker transport
//!
//! Builds a fresh `AsyncClient`/`EventLoop` pair for every connect attempt and
//! drives the event loop on a spawned task. The loop reports the first
//! terminal error and then exits: reconnection is the controller's job, so
//! rumqttc's own reconnect-on-next-poll behaviour is never used.

use super::{
    BrokerTransport, ConnectResult, Credentials, DisconnectReason, InboundMessage, LogLevel,
    TlsFiles, TransportCallbacks, TransportError,
};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, StateError, SubscribeReasonCode, TlsConfiguration, Transport as WireTransport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a graceful disconnect may take before the loop is aborted
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Default capacity of the rumqttc request queue
pub const DEFAULT_REQUEST_CAPACITY: usize = 10;

/// [`BrokerTransport`] implementation on top of rumqttc's v4 async client
pub struct RumqttcTransport {
    client_id: String,
    clean_session: bool,
    request_capacity: usize,
    credentials: Option<Credentials>,
    tls: Option<WireTransport>,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    loop_handle: Option<JoinHandle<()>>,
    disconnect_requested: Arc<AtomicBool>,
    pending_subscriptions: Arc<Mutex<PendingSubscriptions>>,
}

/// Topics of SUBSCRIBE requests awaiting their SubAck.
///
/// rumqttc assigns packet ids inside the event loop, in request order, and
/// reports each one as `Outgoing::Subscribe(pkid)`. Queued topics are matched
/// to those ids first-in first-out.
#[derive(Debug, Default)]
struct PendingSubscriptions {
    queued: VecDeque<String>,
    in_flight: HashMap<u16, String>,
}

impl PendingSubscriptions {
    fn queue(&mut self, topic: &str) {
        self.queued.push_back(topic.to_string());
    }

    /// Undo the last `queue` when the request never reached the loop
    fn unqueue_last(&mut self) {
        self.queued.pop_back();
    }

    fn sent(&mut self, pkid: u16) {
        if let Some(topic) = self.queued.pop_front() {
            self.in_flight.insert(pkid, topic);
        }
    }

    fn acked(&mut self, pkid: u16) -> Option<String> {
        self.in_flight.remove(&pkid)
    }
}

fn lock_pending(pending: &Mutex<PendingSubscriptions>) -> MutexGuard<'_, PendingSubscriptions> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RumqttcTransport {
    /// Create a transport instance for `client_id`
    pub fn create(client_id: &str, clean_session: bool) -> ClientResult<Self> {
        Self::with_capacity(client_id, clean_session, DEFAULT_REQUEST_CAPACITY)
    }

    pub fn with_capacity(
        client_id: &str,
        clean_session: bool,
        request_capacity: usize,
    ) -> ClientResult<Self> {
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(ClientError::allocation(format!(
                "client id '{client_id}' is not usable as an MQTT session identifier"
            )));
        }
        if request_capacity == 0 {
            return Err(ClientError::allocation(
                "request queue capacity must be greater than 0",
            ));
        }

        Ok(Self {
            client_id: client_id.to_string(),
            clean_session,
            request_capacity,
            credentials: None,
            tls: None,
            client: None,
            event_loop: None,
            loop_handle: None,
            disconnect_requested: Arc::new(AtomicBool::new(false)),
            pending_subscriptions: Arc::default(),
        })
    }

    /// Build MQTT options for one connect attempt (pure apart from cloning)
    fn build_options(&self, host: &str, port: u16, keepalive: Duration) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, host, port);
        options.set_keep_alive(keepalive);
        options.set_clean_session(self.clean_session);

        if let Some(credentials) = &self.credentials {
            options.set_credentials(&credentials.username, &credentials.password);
        }
        if let Some(tls) = &self.tls {
            options.set_transport(tls.clone());
        }
        options
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::NoConnection)
    }
}

#[async_trait]
impl BrokerTransport for RumqttcTransport {
    fn set_credentials(
        &mut self,
        credentials: Option<&Credentials>,
    ) -> Result<(), TransportError> {
        self.credentials = credentials
            .filter(|c| !c.username.is_empty() || !c.password.is_empty())
            .cloned();
        Ok(())
    }

    fn set_tls(&mut self, tls: Option<&TlsFiles>) -> Result<(), TransportError> {
        self.tls = tls.map(load_tls_transport).transpose()?;
        Ok(())
    }

    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        keepalive: Duration,
    ) -> Result<(), TransportError> {
        if host.is_empty() {
            return Err(TransportError::Connect("empty host".to_string()));
        }
        if keepalive < Duration::from_secs(1) {
            return Err(TransportError::Connect(format!(
                "keepalive {keepalive:?} is below one second"
            )));
        }

        let options = self.build_options(host, port, keepalive);
        let (client, event_loop) = AsyncClient::new(options, self.request_capacity);
        self.client = Some(client);
        self.event_loop = Some(event_loop);
        debug!(host, port, "Prepared MQTT connection");
        Ok(())
    }

    fn start_loop(&mut self, callbacks: TransportCallbacks) -> Result<(), TransportError> {
        let event_loop = self.event_loop.take().ok_or_else(|| {
            TransportError::Loop("no prepared connection to drive".to_string())
        })?;
        if let Some(previous) = self.loop_handle.take() {
            previous.abort();
        }

        self.disconnect_requested = Arc::new(AtomicBool::new(false));
        self.pending_subscriptions = Arc::default();
        self.loop_handle = Some(tokio::spawn(run_event_loop(
            event_loop,
            callbacks,
            self.disconnect_requested.clone(),
            self.pending_subscriptions.clone(),
        )));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let client = self.client()?;
        self.disconnect_requested.store(true, Ordering::SeqCst);
        client
            .disconnect()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if let Some(mut handle) = self.loop_handle.take() {
            match tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await {
                Ok(_) => debug!("Network loop finished after disconnect"),
                Err(_) => {
                    warn!("Network loop didn't stop after disconnect, forcing abort");
                    handle.abort();
                }
            }
        }
        self.client = None;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let client = self.client()?;
        lock_pending(&self.pending_subscriptions).queue(topic);
        if let Err(e) = client.subscribe(topic, qos).await {
            lock_pending(&self.pending_subscriptions).unqueue_last();
            return Err(TransportError::Request(format!("subscribe to {topic}: {e}")));
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
        self.client()?
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| TransportError::Request(format!("publish to {topic}: {e}")))
    }

    async fn stop_loop(&mut self) {
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
            // Cancellation is the expected outcome here
            let _ = handle.await;
            debug!("Network loop stopped");
        }
        self.event_loop = None;
    }
}

impl Drop for RumqttcTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }
        info!(client_id = %self.client_id, "MQTT transport instance destroyed");
    }
}

/// Read PEM files into a rumqttc TLS transport
pub fn load_tls_transport(tls: &TlsFiles) -> Result<WireTransport, TransportError> {
    let ca = std::fs::read(&tls.ca_file).map_err(|e| {
        TransportError::Tls(format!(
            "failed to read CA cert '{}': {e}",
            tls.ca_file.display()
        ))
    })?;

    let client_auth = match (&tls.cert_file, &tls.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let cert = std::fs::read(cert_file).map_err(|e| {
                TransportError::Tls(format!(
                    "failed to read client cert '{}': {e}",
                    cert_file.display()
                ))
            })?;
            let key = std::fs::read(key_file).map_err(|e| {
                TransportError::Tls(format!(
                    "failed to read client key '{}': {e}",
                    key_file.display()
                ))
            })?;
            Some((cert, key))
        }
        (None, None) => None,
        _ => {
            return Err(TransportError::Tls(
                "client certificate and key must be given together".to_string(),
            ))
        }
    };

    Ok(WireTransport::tls_with_config(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    }))
}

/// Poll the event loop until the session ends, translating rumqttc events
/// into transport callbacks
async fn run_event_loop(
    mut event_loop: EventLoop,
    callbacks: TransportCallbacks,
    disconnect_requested: Arc<AtomicBool>,
    pending_subscriptions: Arc<Mutex<PendingSubscriptions>>,
) {
    let mut connected = false;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected = true;
                callbacks.on_connect(ConnectResult::Success);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                callbacks.on_message(InboundMessage::new(
                    publish.topic,
                    publish.payload,
                    publish.qos,
                    publish.retain,
                ));
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                lock_pending(&pending_subscriptions).sent(pkid);
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                let topic = lock_pending(&pending_subscriptions).acked(suback.pkid);
                let rejected = suback
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if rejected {
                    match topic {
                        Some(topic) => callbacks.on_subscribe_rejected(topic),
                        None => callbacks.on_log(
                            LogLevel::Warning,
                            format!("Broker rejected subscription {}", suback.pkid),
                        ),
                    }
                } else {
                    callbacks.on_log(
                        LogLevel::Debug,
                        format!("Subscription {} confirmed", suback.pkid),
                    );
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                callbacks.on_disconnect(DisconnectReason::Unexpected(
                    "broker closed the session".to_string(),
                ));
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                callbacks.on_log(LogLevel::Debug, "Sent DISCONNECT");
            }
            Ok(event) => {
                callbacks.on_log(LogLevel::Debug, format!("{event:?}"));
            }
            Err(error) => {
                if disconnect_requested.load(Ordering::SeqCst) {
                    callbacks.on_disconnect(DisconnectReason::Graceful);
                } else if connected {
                    callbacks.on_disconnect(classify_drop(&error));
                } else {
                    callbacks.on_connect(classify_connect_error(&error));
                }
                break;
            }
        }
    }
}

/// Map a pre-ConnAck loop error onto a connect result code
pub fn classify_connect_error(error: &ConnectionError) -> ConnectResult {
    match error {
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized,
        ) => ConnectResult::AuthFailed,
        ConnectionError::ConnectionRefused(code) => ConnectResult::Refused(format!("{code:?}")),
        other => ConnectResult::Failed(other.to_string()),
    }
}

/// Map a post-ConnAck loop error onto a disconnect reason
pub fn classify_drop(error: &ConnectionError) -> DisconnectReason {
    match error {
        ConnectionError::MqttState(StateError::AwaitPingResp) => DisconnectReason::KeepaliveTimeout,
        other => DisconnectReason::Unexpected(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_create_rejects_empty_client_id() {
        let result = RumqttcTransport::create("", true);
        assert!(matches!(result, Err(ClientError::Allocation(_))));
    }

    #[test]
    fn test_create_rejects_zero_capacity() {
        let result = RumqttcTransport::with_capacity("CLIENTID_1_END", true, 0);
        assert!(matches!(result, Err(ClientError::Allocation(_))));
    }

    #[test]
    fn test_pending_subscriptions_follow_packet_ids() {
        let mut pending = PendingSubscriptions::default();
        pending.queue("sensors/#");
        pending.queue("alerts");
        pending.queue("dropped");
        pending.unqueue_last();

        pending.sent(7);
        pending.sent(8);
        pending.sent(9);

        assert_eq!(pending.acked(8), Some("alerts".to_string()));
        assert_eq!(pending.acked(7), Some("sensors/#".to_string()));
        assert_eq!(pending.acked(9), None);
        assert_eq!(pending.acked(7), None);
    }

    #[test]
    fn test_auth_refusals_classify_as_auth_failed() {
        for code in [
            ConnectReturnCode::BadUserNamePassword,
            ConnectReturnCode::NotAuthorized,
        ] {
            let error = ConnectionError::ConnectionRefused(code);
            assert_eq!(classify_connect_error(&error), ConnectResult::AuthFailed);
        }
    }

    #[test]
    fn test_other_refusals_classify_as_refused() {
        let error = ConnectionError::ConnectionRefused(ConnectReturnCode::RefusedProtocolVersion);
        assert!(matches!(
            classify_connect_error(&error),
            ConnectResult::Refused(ref detail) if detail.contains("RefusedProtocolVersion")
        ));
    }

    #[test]
    fn test_network_errors_classify_as_failed() {
        let error = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(matches!(
            classify_connect_error(&error),
            ConnectResult::Failed(_)
        ));
    }

    #[test]
    fn test_missed_ping_is_keepalive_timeout() {
        let error = ConnectionError::MqttState(StateError::AwaitPingResp);
        assert_eq!(classify_drop(&error), DisconnectReason::KeepaliveTimeout);

        let error = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        assert!(matches!(classify_drop(&error), DisconnectReason::Unexpected(_)));
    }

    #[test]
    fn test_missing_ca_cert_returns_error() {
        let tls = TlsFiles::new(PathBuf::from("/nonexistent/ca.pem"));
        let err = load_tls_transport(&tls).err().expect("should fail");
        assert!(err.to_string().contains("CA cert"), "got: {err}");
    }

    #[test]
    fn test_cert_without_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        std::fs::write(&ca, b"not really a cert").unwrap();

        let mut tls = TlsFiles::new(&ca);
        tls.cert_file = Some(dir.path().join("client.pem"));
        let err = load_tls_transport(&tls).err().expect("should fail");
        assert!(err.to_string().contains("together"), "got: {err}");
    }

    #[tokio::test]
    async fn test_operations_without_connection_fail() {
        let mut transport = RumqttcTransport::create("CLIENTID_1_END", true).unwrap();
        assert_eq!(
            transport.subscribe("a/b", QoS::AtMostOnce).await,
            Err(TransportError::NoConnection)
        );
        assert_eq!(
            transport
                .publish("a/b", b"x".to_vec(), QoS::AtMostOnce, false)
                .await,
            Err(TransportError::NoConnection)
        );
        assert_eq!(transport.disconnect().await, Err(TransportError::NoConnection));
    }

    #[tokio::test]
    async fn test_start_loop_requires_prepared_connection() {
        let mut transport = RumqttcTransport::create("CLIENTID_1_END", true).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let result = transport.start_loop(TransportCallbacks::new(1, tx));
        assert!(matches!(result, Err(TransportError::Loop(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_sub_second_keepalive() {
        let mut transport = RumqttcTransport::create("CLIENTID_1_END", true).unwrap();
        let result = transport
            .connect("localhost", 1883, Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[test]
    fn test_empty_credentials_are_cleared() {
        let mut transport = RumqttcTransport::create("CLIENTID_1_END", true).unwrap();
        transport
            .set_credentials(Some(&Credentials::new("", "")))
            .unwrap();
        assert!(transport.credentials.is_none());

        transport
            .set_credentials(Some(&Credentials::new("user", "pw")))
            .unwrap();
        assert!(transport.credentials.is_some());
    }
}
