//! Connection controller task
//!
//! One task owns the transport, the connection state, the retry counter, the
//! retained-topic set and the subscription list. Three inputs feed it:
//!
//! - transport events, tagged with the session that produced them
//! - commands from [`super::MqttClient`] handles, each with a reply channel
//! - the single-shot retry timer
//!
//! Because only this task mutates state, a retry firing can never race an
//! explicit disconnect: whichever input is dequeued first wins and the other
//! sees its effects.

use super::connection::{ClientOptions, ConnectionConfig, ConnectionState, RetryState};
use super::dispatch::{Dispatcher, FailureKind};
use super::identity::ClientIdentity;
use super::message_filter::MessageFilter;
use super::retry_policy::{Disposition, RetryDecision, RetryPolicy};
use crate::error::{ClientError, ClientResult};
use crate::transport::library::TRANSPORT_LIBRARY;
use crate::transport::{
    qos_level, BrokerTransport, ConnectResult, Credentials, DisconnectReason, InboundMessage,
    LibraryGuard, LogLevel, QoS, SessionEvent, TlsFiles, TransportCallbacks, TransportError,
    TransportEvent,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Depth of the command queue between handles and the controller
pub const COMMAND_QUEUE_DEPTH: usize = 64;

/// Requests marshalled from handles onto the controller task
#[derive(Debug)]
pub enum Command {
    Connect {
        config: ConnectionConfig,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Subscribe {
        topic: String,
        qos: QoS,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    SetCredentials {
        credentials: Option<Credentials>,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    EnableTls {
        tls: TlsFiles,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Status {
        reply: oneshot::Sender<ClientStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Snapshot of controller state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStatus {
    pub client_id: String,
    pub state: ConnectionState,
    pub retry_count: u32,
    pub max_retry: u32,
    pub retained_topics: usize,
    pub subscriptions: Vec<(String, u8)>,
}

enum Step {
    Event(SessionEvent),
    Command(Option<Command>),
    RetryTimer,
}

/// Single-writer owner of one managed broker connection
pub struct ConnectionController<T: BrokerTransport> {
    identity: ClientIdentity,
    options: ClientOptions,
    config: Option<ConnectionConfig>,
    retry: RetryState,
    retry_deadline: Option<Instant>,
    session: u64,
    loop_active: bool,
    // Whether the transport's credentials/TLS came from the last ConnectionConfig
    credentials_from_config: bool,
    tls_from_config: bool,
    filter: MessageFilter,
    subscriptions: Vec<(String, QoS)>,
    state: watch::Sender<ConnectionState>,
    dispatcher: Dispatcher,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    commands: mpsc::Receiver<Command>,
    // Dropped before the library guard
    transport: T,
    _library: LibraryGuard,
}

impl<T: BrokerTransport> ConnectionController<T> {
    pub fn new(
        identity: ClientIdentity,
        transport: T,
        options: ClientOptions,
        state: watch::Sender<ConnectionState>,
        dispatcher: Dispatcher,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let filter = MessageFilter::new(identity.as_str());

        Self {
            identity,
            options,
            config: None,
            retry: RetryState::default(),
            retry_deadline: None,
            session: 0,
            loop_active: false,
            credentials_from_config: false,
            tls_from_config: false,
            filter,
            subscriptions: Vec::new(),
            state,
            dispatcher,
            events_tx,
            events_rx,
            commands,
            transport,
            _library: TRANSPORT_LIBRARY.acquire(),
        }
    }

    /// Process inputs until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(client_id = %self.identity, "Connection controller started");

        loop {
            let deadline = self.retry_deadline;
            let step = tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => Step::Event(event),
                command = self.commands.recv() => Step::Command(command),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Step::RetryTimer
                }
            };

            match step {
                Step::Event(event) => self.handle_event(event).await,
                Step::RetryTimer => {
                    self.retry_deadline = None;
                    self.on_retry_timer().await;
                }
                Step::Command(Some(Command::Shutdown { reply })) => {
                    self.teardown().await;
                    drop(self);
                    let _ = reply.send(());
                    return;
                }
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Command(None) => {
                    debug!("All client handles dropped");
                    self.teardown().await;
                    return;
                }
            }
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, to: ConnectionState) {
        let from = self.current_state();
        if from != to {
            RetryPolicy::log_state_transition(from, to);
            self.state.send_replace(to);
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { config, reply } => {
                let result = self.connect(config).await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Publish {
                topic,
                payload,
                qos,
                retain,
                reply,
            } => {
                let result = self.publish(&topic, &payload, qos, retain).await;
                let _ = reply.send(result);
            }
            Command::Subscribe { topic, qos, reply } => {
                let result = self.subscribe(&topic, qos).await;
                let _ = reply.send(result);
            }
            Command::SetCredentials { credentials, reply } => {
                let result = self
                    .transport
                    .set_credentials(credentials.as_ref())
                    .map_err(|e| {
                        warn!(error = %e, "Failed to apply credentials");
                        ClientError::from(e)
                    });
                if result.is_ok() {
                    self.credentials_from_config = false;
                }
                let _ = reply.send(result);
            }
            Command::EnableTls { tls, reply } => {
                let result = self.transport.set_tls(Some(&tls)).map_err(|e| {
                    warn!(error = %e, "Failed to enable TLS");
                    ClientError::from(e)
                });
                if result.is_ok() {
                    self.tls_from_config = false;
                }
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            // Handled by the run loop before dispatch
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn status(&self) -> ClientStatus {
        ClientStatus {
            client_id: self.identity.to_string(),
            state: self.current_state(),
            retry_count: self.retry.retry_count,
            max_retry: self.retry.max_retry,
            retained_topics: self.filter.retained_len(),
            subscriptions: self
                .subscriptions
                .iter()
                .map(|(topic, qos)| (topic.clone(), qos_level(*qos)))
                .collect(),
        }
    }

    /// Explicit Connect: validate, replace the stored config and make the
    /// initial attempt. Only that attempt's synchronous outcome is returned.
    ///
    /// Credentials and TLS from `config` replace whatever an earlier config
    /// installed. Values set through `set_credentials`/`enable_tls` stay in
    /// place when `config` carries none.
    async fn connect(&mut self, config: ConnectionConfig) -> ClientResult<()> {
        let config = config.validated().map_err(|e| {
            warn!(error = %e, "Rejected connect request");
            e
        })?;

        self.cancel_retry();
        if self.loop_active {
            if self.current_state() == ConnectionState::Connected {
                if let Err(e) = self.transport.disconnect().await {
                    debug!(error = %e, "Disconnect of replaced session failed");
                }
            }
            self.end_session().await;
        }

        self.apply_security(&config);

        info!(
            endpoint = %config.endpoint(),
            max_retry = config.max_retry,
            "Connecting to MQTT broker"
        );
        self.retry = RetryState::new(config.max_retry);
        self.config = Some(config);

        match self.start_attempt().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Initial connect attempt failed");
                self.set_state(ConnectionState::Disconnected);
                Err(e.into())
            }
        }
    }

    /// Install the config's credentials and TLS. Failures are logged and the
    /// connect goes ahead without them.
    fn apply_security(&mut self, config: &ConnectionConfig) {
        if config.credentials.is_some() || self.credentials_from_config {
            match self.transport.set_credentials(config.credentials.as_ref()) {
                Ok(()) => self.credentials_from_config = config.credentials.is_some(),
                Err(e) => warn!(error = %e, "Failed to apply credentials, connecting without them"),
            }
        }
        if config.tls.is_some() || self.tls_from_config {
            match self.transport.set_tls(config.tls.as_ref()) {
                Ok(()) => self.tls_from_config = config.tls.is_some(),
                Err(e) => warn!(error = %e, "Failed to enable TLS, connecting without it"),
            }
        }
    }

    /// Issue the transport connect and start its loop under a new session
    async fn start_attempt(&mut self) -> Result<(), TransportError> {
        let Some(config) = self.config.clone() else {
            return Err(TransportError::Connect(
                "no connection configured".to_string(),
            ));
        };

        self.session += 1;
        self.set_state(ConnectionState::Connecting);
        self.transport
            .connect(&config.host, config.port, config.keepalive)
            .await?;

        let callbacks = TransportCallbacks::new(self.session, self.events_tx.clone());
        self.transport.start_loop(callbacks)?;
        self.loop_active = true;
        debug!(session = self.session, "Network loop started");
        Ok(())
    }

    /// Stop the running loop and fence off its remaining events
    async fn end_session(&mut self) {
        if self.loop_active {
            self.transport.stop_loop().await;
            self.loop_active = false;
        }
        self.session += 1;
    }

    fn cancel_retry(&mut self) {
        if self.retry_deadline.take().is_some() {
            debug!("Retry timer cancelled");
        }
    }

    fn arm_retry(&mut self) {
        let delay = self.options.retry_interval;
        self.retry_deadline = Some(Instant::now() + delay);
        debug!(delay_ms = delay.as_millis() as u64, "Retry timer armed");
    }

    async fn disconnect(&mut self) {
        if self.current_state() == ConnectionState::Disconnected {
            debug!("Disconnect requested while already disconnected");
            return;
        }

        self.cancel_retry();
        if self.current_state() == ConnectionState::Connected {
            if let Err(e) = self.transport.disconnect().await {
                warn!(error = %e, "Graceful disconnect failed");
            }
        }
        self.end_session().await;
        self.subscriptions.clear();
        self.set_state(ConnectionState::Disconnected);
        self.dispatcher.disconnected();
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> ClientResult<()> {
        let state = self.current_state();
        if !RetryPolicy::can_send(state) {
            warn!(topic, %state, "Cannot publish: not connected");
            return Err(ClientError::NotConnected { state });
        }

        let framed = self.identity.frame_payload(payload);
        self.transport
            .publish(topic, framed, qos, retain)
            .await
            .map_err(|e| {
                warn!(topic, error = %e, "Publish failed");
                ClientError::from(e)
            })?;
        debug!(topic, ?qos, retain, "Published message");
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> ClientResult<()> {
        let state = self.current_state();
        if !RetryPolicy::can_send(state) {
            warn!(topic, %state, "Cannot subscribe: not connected");
            return Err(ClientError::NotConnected { state });
        }

        self.send_subscribe(topic, qos).await?;
        match self.subscriptions.iter_mut().find(|(t, _)| t == topic) {
            Some(entry) => entry.1 = qos,
            None => self.subscriptions.push((topic.to_string(), qos)),
        }
        Ok(())
    }

    async fn send_subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        match self.transport.subscribe(topic, qos).await {
            Ok(()) => {
                info!(topic, ?qos, "Subscribed");
                Ok(())
            }
            Err(e) => {
                warn!(topic, error = %e, "Subscribe failed");
                self.dispatcher.failed(
                    FailureKind::Subscribe,
                    format!("subscribe to {topic} failed: {e}"),
                );
                Err(e)
            }
        }
    }

    async fn resubscribe(&mut self) {
        let subscriptions = self.subscriptions.clone();
        for (topic, qos) in subscriptions {
            // Failure is reported through the notification channel
            let _ = self.send_subscribe(&topic, qos).await;
        }
    }

    async fn handle_event(&mut self, SessionEvent { session, event }: SessionEvent) {
        if let TransportEvent::Log { level, text } = &event {
            log_transport_line(*level, text);
            return;
        }
        if session != self.session {
            debug!(
                session,
                current = self.session,
                "Ignoring event from superseded session"
            );
            return;
        }

        match event {
            TransportEvent::Connect(result) => self.on_connect(result).await,
            TransportEvent::Disconnect(reason) => self.on_disconnect(reason).await,
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::SubscribeRejected { topic } => self.on_subscribe_rejected(topic),
            TransportEvent::Log { .. } => {}
        }
    }

    async fn on_connect(&mut self, result: ConnectResult) {
        match RetryPolicy::on_connect(&result) {
            Disposition::Established => {
                self.cancel_retry();
                self.retry.reset();
                self.filter.clear_retained();
                self.set_state(ConnectionState::Connected);
                self.dispatcher.connected();
                self.resubscribe().await;
            }
            Disposition::GiveUp { kind, error } => {
                RetryPolicy::log_give_up(kind, &error);
                self.cancel_retry();
                self.end_session().await;
                self.set_state(ConnectionState::Disconnected);
                self.dispatcher.failed(kind, error.to_string());
            }
            Disposition::Retry { reason } => self.schedule_retry(reason).await,
            Disposition::Closed => {}
        }
    }

    async fn on_disconnect(&mut self, reason: DisconnectReason) {
        match RetryPolicy::on_disconnect(&reason) {
            Disposition::Closed => {
                self.cancel_retry();
                self.end_session().await;
                if self.current_state() != ConnectionState::Disconnected {
                    self.set_state(ConnectionState::Disconnected);
                    self.dispatcher.disconnected();
                }
            }
            Disposition::Retry { reason } => match self.current_state() {
                ConnectionState::Connected | ConnectionState::Connecting => {
                    self.schedule_retry(reason).await
                }
                state => debug!(%state, "Ignoring disconnect outside an active session"),
            },
            Disposition::Established | Disposition::GiveUp { .. } => {}
        }
    }

    /// Forget a subscription the broker refused so reconnects don't repeat it
    fn on_subscribe_rejected(&mut self, topic: String) {
        warn!(topic = %topic, "Broker rejected subscription");
        self.subscriptions.retain(|(t, _)| *t != topic);
        self.dispatcher.failed(
            FailureKind::Subscribe,
            format!("broker rejected subscription to {topic}"),
        );
    }

    fn on_message(&mut self, message: InboundMessage) {
        if self.filter.check(&message).is_deliver() {
            self.dispatcher.message(message);
        }
    }

    /// Enter Reconnecting, report the failure and arm the timer
    async fn schedule_retry(&mut self, reason: String) {
        warn!(reason = %reason, "MQTT connection failed");
        self.end_session().await;
        self.set_state(ConnectionState::Reconnecting);
        self.dispatcher.failed(FailureKind::Transport, reason);
        self.arm_retry();
    }

    async fn on_retry_timer(&mut self) {
        if self.current_state() != ConnectionState::Reconnecting {
            debug!("Retry timer fired outside Reconnecting, ignoring");
            return;
        }

        match RetryPolicy::next_attempt(&mut self.retry) {
            RetryDecision::Exhausted { max_retry } => {
                let error = ClientError::RetryExhausted { max_retry };
                error!("{}", error);
                self.set_state(ConnectionState::Disconnected);
                self.dispatcher
                    .failed(FailureKind::RetryExhausted, error.to_string());
            }
            RetryDecision::Attempt { attempt } => {
                info!(
                    attempt,
                    max_retry = self.retry.max_retry,
                    "Retrying MQTT connection"
                );
                if let Err(e) = self.start_attempt().await {
                    self.schedule_retry(e.to_string()).await;
                }
            }
        }
    }

    async fn teardown(&mut self) {
        info!(client_id = %self.identity, "Shutting down connection controller");
        self.disconnect().await;
        self.cancel_retry();
        self.transport.stop_loop().await;
        self.loop_active = false;
    }
}

fn log_transport_line(level: LogLevel, text: &str) {
    match level {
        LogLevel::Debug => debug!(target: "mqtt_transport", "{}", text),
        LogLevel::Info | LogLevel::Notice => info!(target: "mqtt_transport", "{}", text),
        LogLevel::Warning => warn!(target: "mqtt_transport", "{}", text),
        LogLevel::Error => error!(target: "mqtt_transport", "{}", text),
    }
}
