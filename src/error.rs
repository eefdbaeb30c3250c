//! Error types for the managed MQTT client
//!
//! Validation and allocation errors are returned synchronously to the caller.
//! Everything that happens after the initial connect attempt is reported
//! asynchronously through [`crate::client::Notification::ConnectionFailed`].

use crate::client::connection::ConnectionState;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    #[error("Invalid connection parameters: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Max retry attempts ({max_retry}) exceeded")]
    RetryExhausted { max_retry: u32 },

    #[error("Failed to create transport instance: {0}")]
    Allocation(String),

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Connection controller has shut down")]
    ControllerClosed,
}

impl ClientError {
    /// Create validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Create allocation error
    pub fn allocation<S: Into<String>>(message: S) -> Self {
        Self::Allocation(message.into())
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
