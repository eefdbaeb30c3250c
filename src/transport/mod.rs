//! Broker transport layer
//!
//! The controller never talks to the network directly. It drives a
//! [`BrokerTransport`] through a small operation set and receives the
//! transport's connect, disconnect, message and log events through the
//! [`TransportCallbacks`] it hands over when the network loop starts.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub mod callbacks;
pub mod library;
pub mod rumqttc_transport;

pub use callbacks::{SessionEvent, TransportCallbacks};
pub use library::{LibraryGuard, LibraryRegistry};
pub use rumqttc_transport::RumqttcTransport;
pub use rumqttc::QoS;

/// Transport-level failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("transport has no active connection")]
    NoConnection,
    #[error("TLS configuration failed: {0}")]
    Tls(String),
    #[error("connection attempt failed: {0}")]
    Connect(String),
    #[error("network loop failed: {0}")]
    Loop(String),
    #[error("request rejected: {0}")]
    Request(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Result code delivered through `on_connect`
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectResult {
    Success,
    /// Broker rejected the credentials
    AuthFailed,
    /// Broker refused the connection for a non-credential reason
    Refused(String),
    /// Network or protocol failure before the session was established
    Failed(String),
}

/// Reason code delivered through `on_disconnect`
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// Disconnect requested by the application
    Graceful,
    /// Broker stopped answering keepalive pings
    KeepaliveTimeout,
    Unexpected(String),
}

/// Severity of a transport log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

/// Message received from the broker
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Events a transport reports back to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connect(ConnectResult),
    Disconnect(DisconnectReason),
    Message(InboundMessage),
    /// Broker answered a SUBSCRIBE with a failure return code
    SubscribeRejected { topic: String },
    Log { level: LogLevel, text: String },
}

/// Username/password pair for broker authentication
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// TLS material paths. Client certificate and key are only used together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca_file: PathBuf,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl TlsFiles {
    pub fn new(ca_file: impl Into<PathBuf>) -> Self {
        Self {
            ca_file: ca_file.into(),
            cert_file: None,
            key_file: None,
        }
    }

    pub fn with_client_auth(
        mut self,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        self.cert_file = Some(cert_file.into());
        self.key_file = Some(key_file.into());
        self
    }
}

/// Operation set the controller needs from a broker transport.
///
/// Implementations own the network loop. Everything the broker does after
/// `start_loop` is reported through the supplied callbacks; the callbacks only
/// enqueue, so they are safe to call from the loop task.
#[async_trait]
pub trait BrokerTransport: Send + 'static {
    /// Store credentials for the next connect. `None` clears them.
    fn set_credentials(&mut self, credentials: Option<&Credentials>)
        -> Result<(), TransportError>;

    /// Load TLS material for the next connect. `None` goes back to plain TCP.
    fn set_tls(&mut self, tls: Option<&TlsFiles>) -> Result<(), TransportError>;

    /// Prepare a connection to `host:port`. The handshake itself happens once
    /// the loop is running; its outcome arrives through `on_connect`.
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        keepalive: Duration,
    ) -> Result<(), TransportError>;

    /// Start the background network loop for the prepared connection
    fn start_loop(&mut self, callbacks: TransportCallbacks) -> Result<(), TransportError>;

    /// Gracefully disconnect from the broker
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Force-stop the network loop. No-op when no loop is running.
    async fn stop_loop(&mut self);
}

/// Map a numeric QoS level onto the wire QoS
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Numeric level of a wire QoS
pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_level_mapping() {
        for level in 0..=2u8 {
            let qos = qos_from_level(level).unwrap();
            assert_eq!(qos_level(qos), level);
        }
        assert_eq!(qos_from_level(3), None);
    }

    #[test]
    fn test_payload_text_is_lossy() {
        let msg = InboundMessage::new("t", vec![b'h', b'i', 0xff], QoS::AtMostOnce, false);
        assert!(msg.payload_text().starts_with("hi"));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("izumi", "123456");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("izumi"));
        assert!(!rendered.contains("123456"));
    }

    #[test]
    fn test_tls_files_client_auth() {
        let tls = TlsFiles::new("/etc/ca.pem").with_client_auth("/etc/c.pem", "/etc/k.pem");
        assert_eq!(tls.cert_file, Some(PathBuf::from("/etc/c.pem")));
        assert_eq!(tls.key_file, Some(PathBuf::from("/etc/k.pem")));
    }
}
