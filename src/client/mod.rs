//! Managed MQTT client
//!
//! This module is organized into focused submodules:
//! - `connection`: state, parameters and retry bookkeeping
//! - `retry_policy`: pure lifecycle decisions
//! - `identity`: client id and self-origin marker
//! - `message_filter`: inbound deliver/drop rules
//! - `dispatch`: notifications to the application
//! - `controller`: the task that owns all of the above
//! - `handle`: the public, thread-safe API

pub mod connection;
pub mod controller;
pub mod dispatch;
pub mod handle;
pub mod identity;
pub mod message_filter;
pub mod retry_policy;

pub use connection::{ClientOptions, ConnectionConfig, ConnectionState, RetryState};
pub use controller::ClientStatus;
pub use dispatch::{FailureKind, Notification};
pub use handle::MqttClient;
pub use identity::ClientIdentity;
pub use message_filter::{should_deliver, FilterDecision, MessageFilter};
