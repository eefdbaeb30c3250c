//! Public client handle
//!
//! [`MqttClient`] is cheap to clone and safe to share across threads. Every
//! operation is queued onto the controller task and awaited there, so calls
//! from any thread are applied one at a time in arrival order.

use super::connection::{ClientOptions, ConnectionConfig, ConnectionState};
use super::controller::{ClientStatus, Command, ConnectionController, COMMAND_QUEUE_DEPTH};
use super::dispatch::{Dispatcher, Notification};
use super::identity::ClientIdentity;
use crate::error::{ClientError, ClientResult};
use crate::mqtt_span;
use crate::transport::{BrokerTransport, Credentials, QoS, RumqttcTransport, TlsFiles};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

/// Handle to a managed MQTT connection
#[derive(Debug, Clone)]
pub struct MqttClient {
    identity: ClientIdentity,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl MqttClient {
    /// Start a controller task over `transport`.
    ///
    /// Must be called from within a tokio runtime. The returned receiver
    /// yields every notification; the controller keeps running if it is
    /// dropped.
    ///
    /// ```
    /// use mqtt_courier::client::{
    ///     ClientIdentity, ClientOptions, ConnectionConfig, MqttClient, Notification,
    /// };
    /// use mqtt_courier::testing::MockTransport;
    ///
    /// # tokio_test::block_on(async {
    /// let (client, mut notifications) = MqttClient::spawn(
    ///     ClientIdentity::new("demo"),
    ///     MockTransport::new(),
    ///     ClientOptions::default(),
    /// );
    /// client.connect(ConnectionConfig::new("broker.example")).await.unwrap();
    /// assert_eq!(notifications.recv().await, Some(Notification::Connected));
    /// # });
    /// ```
    pub fn spawn<T: BrokerTransport>(
        identity: ClientIdentity,
        transport: T,
        options: ClientOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (dispatcher, notifications) = Dispatcher::channel();

        let span = mqtt_span!(client_id = %identity);
        let controller = ConnectionController::new(
            identity.clone(),
            transport,
            options,
            state_tx,
            dispatcher,
            commands_rx,
        );
        tokio::spawn(controller.run().instrument(span));

        let client = Self {
            identity,
            commands: commands_tx,
            state: state_rx,
        };
        (client, notifications)
    }

    /// Start a controller backed by rumqttc with a freshly generated identity
    pub fn with_rumqttc(
        options: ClientOptions,
    ) -> ClientResult<(Self, mpsc::UnboundedReceiver<Notification>)> {
        let identity = ClientIdentity::generate();
        let transport = RumqttcTransport::with_capacity(
            identity.as_str(),
            options.clean_session,
            options.request_capacity,
        )?;
        Ok(Self::spawn(identity, transport, options))
    }

    pub fn client_id(&self) -> &str {
        self.identity.as_str()
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that observes every state change
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Validate `config` and start connecting. `Ok` means the initial attempt
    /// was accepted; the outcome arrives as a notification.
    pub async fn connect(&self, config: ConnectionConfig) -> ClientResult<()> {
        self.request(|reply| Command::Connect { config, reply })
            .await?
    }

    /// Disconnect and cancel any pending retry. Idempotent.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Publish `payload` prefixed with this client's marker
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> ClientResult<()> {
        let topic = topic.into();
        let payload = payload.into();
        self.request(|reply| Command::Publish {
            topic,
            payload,
            qos,
            retain,
            reply,
        })
        .await?
    }

    /// Subscribe and remember the topic for resubscription after reconnects
    pub async fn subscribe(&self, topic: impl Into<String>, qos: QoS) -> ClientResult<()> {
        let topic = topic.into();
        self.request(|reply| Command::Subscribe { topic, qos, reply })
            .await?
    }

    /// Replace transport credentials for subsequent connects
    pub async fn set_credentials(&self, credentials: Option<Credentials>) -> ClientResult<()> {
        self.request(|reply| Command::SetCredentials { credentials, reply })
            .await?
    }

    /// Load TLS material for subsequent connects
    pub async fn enable_tls(&self, tls: TlsFiles) -> ClientResult<()> {
        self.request(|reply| Command::EnableTls { tls, reply })
            .await?
    }

    pub async fn status(&self) -> ClientResult<ClientStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Disconnect, release the transport and stop the controller. Returns
    /// once teardown has finished; a controller that is already gone counts
    /// as shut down.
    pub async fn shutdown(&self) -> ClientResult<()> {
        match self.request(|reply| Command::Shutdown { reply }).await {
            Ok(()) | Err(ClientError::ControllerClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> ClientResult<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ClientError::ControllerClosed)?;
        response.await.map_err(|_| ClientError::ControllerClosed)
    }
}
