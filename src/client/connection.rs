//! Connection state, parameters and retry bookkeeping
//!
//! Everything here is plain data plus pure validation. The controller task is
//! the only writer of these values at runtime.

use crate::error::{ClientError, ClientResult};
use crate::transport::rumqttc_transport::DEFAULT_REQUEST_CAPACITY;
use crate::transport::{Credentials, TlsFiles};
use serde::Serialize;
use std::time::Duration;

/// Default MQTT port for plain TCP
pub const DEFAULT_PORT: u16 = 1883;
/// Default keepalive interval
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(60);
/// Largest keepalive the CONNECT packet's 16-bit field can carry
pub const MAX_KEEPALIVE_SECS: u64 = u16::MAX as u64;
/// Default number of retries after the initial attempt
pub const DEFAULT_MAX_RETRY: u32 = 3;
/// Delay between a failure and the next connect attempt
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Initial state, also reached after an explicit disconnect, an
    /// auth/refused failure, or exhausted retries
    Disconnected,
    /// Connect attempt in flight
    Connecting,
    /// Session established and ready for publish/subscribe
    Connected,
    /// Waiting on the retry timer after a failure
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Parameters for one managed connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
    pub max_retry: u32,
    pub credentials: Option<Credentials>,
    pub tls: Option<TlsFiles>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            keepalive: DEFAULT_KEEPALIVE,
            max_retry: DEFAULT_MAX_RETRY,
            credentials: None,
            tls: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn with_tls(mut self, tls: TlsFiles) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Check the parameters and return a copy with `max_retry` clamped to at
    /// least 1. No I/O happens here.
    pub fn validated(&self) -> ClientResult<ConnectionConfig> {
        if self.host.trim().is_empty() {
            return Err(ClientError::validation("host must not be empty"));
        }
        if self.port == 0 {
            return Err(ClientError::validation("port must be in 1..=65535"));
        }
        if self.keepalive.as_secs() == 0 {
            return Err(ClientError::validation(
                "keepalive must be at least one second",
            ));
        }
        if self.keepalive.as_secs() > MAX_KEEPALIVE_SECS {
            return Err(ClientError::validation(format!(
                "keepalive must be at most {MAX_KEEPALIVE_SECS} seconds"
            )));
        }
        if let Some(credentials) = &self.credentials {
            if credentials.username.is_empty() && !credentials.password.is_empty() {
                return Err(ClientError::validation(
                    "password given without a username",
                ));
            }
        }

        let mut config = self.clone();
        config.max_retry = config.max_retry.max(1);
        Ok(config)
    }

    /// `host:port` for log lines
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Controller-wide tuning that is not part of a single connect call
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub retry_interval: Duration,
    pub request_capacity: usize,
    pub clean_session: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            clean_session: true,
        }
    }
}

impl ClientOptions {
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

/// Retry counter and its ceiling.
///
/// `retry_count` stays within `0..=max_retry + 1`; it only passes `max_retry`
/// on the fire that exhausts the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryState {
    pub retry_count: u32,
    pub max_retry: u32,
}

impl RetryState {
    pub fn new(max_retry: u32) -> Self {
        Self {
            retry_count: 0,
            max_retry: max_retry.max(1),
        }
    }

    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    /// Count one timer fire; returns the new count
    pub fn record_fire(&mut self) -> u32 {
        if self.retry_count <= self.max_retry {
            self.retry_count += 1;
        }
        self.retry_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count > self.max_retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("broker.example");
        assert_eq!(config.port, 1883);
        assert_eq!(config.keepalive, Duration::from_secs(60));
        assert_eq!(config.max_retry, 3);
        assert!(config.credentials.is_none());
        assert!(config.tls.is_none());

        let options = ClientOptions::default();
        assert_eq!(options.retry_interval, Duration::from_secs(5));
        assert!(options.clean_session);
    }

    #[test]
    fn test_validation_rejects_bad_parameters() {
        let cases = [
            ConnectionConfig::new(""),
            ConnectionConfig::new("   "),
            ConnectionConfig::new("broker.example").with_port(0),
            ConnectionConfig::new("broker.example").with_keepalive(Duration::ZERO),
            ConnectionConfig::new("broker.example").with_keepalive(Duration::from_millis(500)),
            ConnectionConfig::new("broker.example").with_keepalive(Duration::from_secs(70_000)),
            ConnectionConfig::new("broker.example").with_credentials("", "secret"),
        ];

        for config in cases {
            let result = config.validated();
            assert!(
                matches!(result, Err(ClientError::Validation(_))),
                "expected validation error for {config:?}"
            );
        }
    }

    #[test]
    fn test_validation_clamps_max_retry() {
        let config = ConnectionConfig::new("broker.example")
            .with_max_retry(0)
            .validated()
            .unwrap();
        assert_eq!(config.max_retry, 1);

        let config = ConnectionConfig::new("broker.example")
            .with_max_retry(7)
            .validated()
            .unwrap();
        assert_eq!(config.max_retry, 7);
    }

    #[test]
    fn test_retry_state_counts_past_ceiling_once() {
        let mut retry = RetryState::new(2);
        assert_eq!(retry.record_fire(), 1);
        assert!(!retry.is_exhausted());
        assert_eq!(retry.record_fire(), 2);
        assert!(!retry.is_exhausted());
        assert_eq!(retry.record_fire(), 3);
        assert!(retry.is_exhausted());

        // Never runs past max_retry + 1
        assert_eq!(retry.record_fire(), 3);

        retry.reset();
        assert_eq!(retry.retry_count, 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
