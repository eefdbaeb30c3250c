//! mqtt-courier - managed MQTT publish/subscribe client
//!
//! A single broker connection owned by a controller task that reconnects on
//! failure, filters the client's own traffic out of inbound messages, and
//! reports everything to the application as [`client::Notification`]s.
//!
//! # Quick Start
//!
//! ```no_run
//! use mqtt_courier::client::{ClientOptions, ConnectionConfig, MqttClient, Notification};
//! use mqtt_courier::transport::QoS;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, mut notifications) = MqttClient::with_rumqttc(ClientOptions::default())?;
//! client
//!     .connect(ConnectionConfig::new("broker.example").with_max_retry(3))
//!     .await?;
//!
//! while let Some(notification) = notifications.recv().await {
//!     match notification {
//!         Notification::Connected => client.subscribe("sensors/#", QoS::AtLeastOnce).await?,
//!         Notification::MessageReceived(message) => println!("{}", message.payload_text()),
//!         other => println!("{other:?}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod output;
pub mod testing;
pub mod transport;

pub use client::{
    ClientIdentity, ClientOptions, ClientStatus, ConnectionConfig, ConnectionState, FailureKind,
    MqttClient, Notification,
};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use transport::{BrokerTransport, InboundMessage, QoS};
