//! Impure I/O for probe sessions
//!
//! Every [`MqttSession::connect`] builds a fresh rumqttc client and event
//! loop and spawns a task that drives it. The task publishes the connection
//! state on a watch channel, forwards acknowledgements to the caller and
//! invokes delivery callbacks. Sessions never reconnect on their own: a
//! connection the broker drops stays dropped until the probe connects again.

use super::connection::{
    configure_mqtt_options, generate_client_id, validate_client_id, ConnectionState,
};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::ConnectionConfig;
use crate::transport::{
    BrokerSession, ConnectAck, MessageCallback, QoS, ReasonCode, SessionError, SessionFactory,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, ConnectionError, EventLoop};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Request channel capacity of each rumqttc client
const EVENT_CHANNEL_CAPACITY: usize = 10;

/// How long disconnect waits for the event loop task to finish
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type Subscriptions = Arc<StdMutex<Vec<(String, MessageCallback)>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckKind {
    Subscribe,
    Publish,
}

/// Request and acknowledgement events forwarded by the event loop task
#[derive(Debug)]
enum AckEvent {
    /// The request went out with this packet id
    Sent { kind: AckKind, pkid: u16 },
    /// The broker acknowledged this packet id
    Acked {
        kind: AckKind,
        pkid: u16,
        failure: Option<ReasonCode>,
    },
}

/// Pairs acknowledgements with the request that is waiting for them
///
/// rumqttc emits exactly one outgoing event per publish or subscribe request,
/// in request order, so the n-th request owns the packet id of the n-th
/// outgoing event of its kind. Acks for any other packet id are stale.
#[derive(Debug, Default)]
struct AckTracker {
    publish: RequestCount,
    subscribe: RequestCount,
}

#[derive(Debug, Default)]
struct RequestCount {
    requested: u64,
    sent: u64,
}

impl AckTracker {
    fn count(&mut self, kind: AckKind) -> &mut RequestCount {
        match kind {
            AckKind::Publish => &mut self.publish,
            AckKind::Subscribe => &mut self.subscribe,
        }
    }

    /// Register a request handed to the client. Returns its ticket.
    fn request(&mut self, kind: AckKind) -> u64 {
        let count = self.count(kind);
        count.requested += 1;
        count.requested
    }

    /// Register an outgoing event. Returns the ticket it belongs to.
    fn sent(&mut self, kind: AckKind) -> u64 {
        let count = self.count(kind);
        count.sent += 1;
        count.sent
    }
}

/// Client, ack stream and task of the current connection
struct LiveConnection {
    client: AsyncClient,
    acks: mpsc::UnboundedReceiver<AckEvent>,
    tracker: AckTracker,
    handle: JoinHandle<()>,
}

/// A single MQTT 5 client connection used by one probe step
pub struct MqttSession {
    client_id: String,
    config: Arc<ConnectionConfig>,
    subscriptions: Subscriptions,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    live: Mutex<Option<LiveConnection>>,
}

impl MqttSession {
    pub fn new(client_id: String, config: Arc<ConnectionConfig>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        Self {
            client_id,
            config,
            subscriptions: Arc::new(StdMutex::new(Vec::new())),
            state_tx: Arc::new(state_tx),
            state_rx,
            live: Mutex::new(None),
        }
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Wait for the first CONNACK (or connection failure) reported by the task
    async fn wait_for_connack(
        connack_rx: oneshot::Receiver<Result<ConnectAck, SessionError>>,
        timeout: Duration,
    ) -> Result<ConnectAck, SessionError> {
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Connection(
                "Event loop stopped before CONNACK".to_string(),
            )),
            Err(_) => Err(SessionError::AckTimeout("CONNACK")),
        }
    }

    /// Wait for the acknowledgement of the request holding `ticket`
    ///
    /// Every event read here is counted by `tracker`, whatever kind is awaited,
    /// so tickets stay aligned after timeouts.
    async fn wait_for_ack(
        acks: &mut mpsc::UnboundedReceiver<AckEvent>,
        tracker: &mut AckTracker,
        kind: AckKind,
        ticket: u64,
        name: &'static str,
        timeout: Duration,
    ) -> Result<Option<ReasonCode>, SessionError> {
        let wait = async {
            let mut awaited = None;
            while let Some(event) = acks.recv().await {
                match event {
                    AckEvent::Sent { kind: sent, pkid } => {
                        if tracker.sent(sent) == ticket && sent == kind {
                            awaited = Some(pkid);
                        }
                    }
                    AckEvent::Acked {
                        kind: acked,
                        pkid,
                        failure,
                    } if acked == kind && awaited == Some(pkid) => return Ok(failure),
                    AckEvent::Acked { kind: acked, pkid, .. } => {
                        debug!(?acked, pkid, "Skipping stale acknowledgement");
                    }
                }
            }
            Err(SessionError::Connection(format!(
                "Connection closed while waiting for {name}"
            )))
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SessionError::AckTimeout(name))?
    }

    /// Borrow the live connection, failing when the session is not connected
    fn connected<'a>(
        &self,
        live: &'a mut Option<LiveConnection>,
    ) -> Result<&'a mut LiveConnection, SessionError> {
        match live.as_mut() {
            Some(connection) if self.state_rx.borrow().is_connected() => Ok(connection),
            _ => Err(SessionError::NotConnected),
        }
    }

    fn remove_subscription(&self, callback: &MessageCallback) {
        let mut subscriptions = lock_subscriptions(&self.subscriptions);
        subscriptions.retain(|(_, registered)| !Arc::ptr_eq(registered, callback));
    }

    /// Drive the rumqttc event loop until the connection ends
    async fn run_event_loop(
        client_id: String,
        mut event_loop: EventLoop,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        subscriptions: Subscriptions,
        ack_tx: mpsc::UnboundedSender<AckEvent>,
        connack_tx: oneshot::Sender<Result<ConnectAck, SessionError>>,
    ) {
        let mut connack_tx = Some(connack_tx);

        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    if !Self::process_event_route(
                        route,
                        &client_id,
                        &state_tx,
                        &subscriptions,
                        &ack_tx,
                        &mut connack_tx,
                    ) {
                        break;
                    }
                }
                Err(ConnectionError::ConnectionRefused(code)) => {
                    let ack = ConnectAck {
                        code: ReasonCode::from_debug(&code),
                        session_present: false,
                    };
                    debug!(client_id = %client_id, code = %ack.code, "Connection refused");
                    state_tx.send_replace(ConnectionState::Disconnected(format!(
                        "Connection refused: {}",
                        ack.code
                    )));
                    if let Some(tx) = connack_tx.take() {
                        let _ = tx.send(Ok(ack));
                    }
                    break;
                }
                Err(e) => {
                    let closing = matches!(
                        *state_tx.borrow(),
                        ConnectionState::Disconnected(_)
                    );
                    if closing {
                        debug!(client_id = %client_id, "Event loop closed: {}", e);
                    } else if connack_tx.is_some() {
                        warn!(client_id = %client_id, "Connection failed: {}", e);
                    } else {
                        debug!(client_id = %client_id, "Connection lost: {}", e);
                    }
                    state_tx.send_replace(ConnectionState::Disconnected(e.to_string()));
                    if let Some(tx) = connack_tx.take() {
                        let _ = tx.send(Err(SessionError::Connection(e.to_string())));
                    }
                    break;
                }
            }
        }
        debug!(client_id = %client_id, "Event loop stopped");
    }

    /// Act on a routed event. Returns false when the loop should stop.
    fn process_event_route(
        route: EventRoute,
        client_id: &str,
        state_tx: &watch::Sender<ConnectionState>,
        subscriptions: &Subscriptions,
        ack_tx: &mpsc::UnboundedSender<AckEvent>,
        connack_tx: &mut Option<oneshot::Sender<Result<ConnectAck, SessionError>>>,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged(ack) => {
                if ack.code.is_success() {
                    state_tx.send_replace(ConnectionState::Connected);
                }
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Ok(ack));
                }
                true
            }
            EventRoute::MessageReceived(delivery) => {
                let callbacks = lock_subscriptions(subscriptions).clone();
                let invoked = MessageHandler::dispatch(&callbacks, &delivery);
                if invoked == 0 {
                    debug!(client_id = %client_id, topic = %delivery.topic, "Delivery without matching subscription");
                }
                true
            }
            EventRoute::Disconnected(reason) => {
                debug!(client_id = %client_id, reason = %reason, "Broker sent DISCONNECT");
                state_tx.send_replace(ConnectionState::Disconnected(reason));
                false
            }
            EventRoute::SubscriptionAcknowledged { pkid, failure } => {
                debug!(client_id = %client_id, pkid, ?failure, "SUBACK");
                let _ = ack_tx.send(AckEvent::Acked {
                    kind: AckKind::Subscribe,
                    pkid,
                    failure,
                });
                true
            }
            EventRoute::PublishAcknowledged { pkid, failure } => {
                debug!(client_id = %client_id, pkid, ?failure, "Publish acknowledged");
                let _ = ack_tx.send(AckEvent::Acked {
                    kind: AckKind::Publish,
                    pkid,
                    failure,
                });
                true
            }
            EventRoute::PublishSent { pkid } => {
                let _ = ack_tx.send(AckEvent::Sent {
                    kind: AckKind::Publish,
                    pkid,
                });
                true
            }
            EventRoute::SubscribeSent { pkid } => {
                let _ = ack_tx.send(AckEvent::Sent {
                    kind: AckKind::Subscribe,
                    pkid,
                });
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }
}

fn lock_subscriptions(
    subscriptions: &Subscriptions,
) -> std::sync::MutexGuard<'_, Vec<(String, MessageCallback)>> {
    subscriptions
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BrokerSession for MqttSession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn connect(&self) -> Result<ConnectAck, SessionError> {
        let mut live = self.live.lock().await;
        if let Some(previous) = live.take() {
            previous.handle.abort();
        }

        let mqtt_options = configure_mqtt_options(&self.client_id, &self.config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, EVENT_CHANNEL_CAPACITY);
        let (ack_tx, acks) = mpsc::unbounded_channel();
        let (connack_tx, connack_rx) = oneshot::channel();

        self.state_tx.send_replace(ConnectionState::Connecting);
        let handle = tokio::spawn(Self::run_event_loop(
            self.client_id.clone(),
            event_loop,
            self.state_tx.clone(),
            self.subscriptions.clone(),
            ack_tx,
            connack_tx,
        ));

        match Self::wait_for_connack(connack_rx, self.config.timeout).await {
            Ok(ack) => {
                if ack.code.is_success() {
                    *live = Some(LiveConnection {
                        client,
                        acks,
                        tracker: AckTracker::default(),
                        handle,
                    });
                } else {
                    handle.abort();
                }
                Ok(ack)
            }
            Err(e) => {
                handle.abort();
                self.state_tx
                    .send_replace(ConnectionState::Disconnected(e.to_string()));
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        let mut live = self.live.lock().await;
        let Some(mut connection) = live.take() else {
            return Ok(());
        };

        let was_connected = self.state_rx.borrow().is_connected();
        self.state_tx.send_replace(ConnectionState::Disconnected(
            "Client disconnected".to_string(),
        ));

        let result = if was_connected {
            connection
                .client
                .disconnect()
                .await
                .map_err(|e| SessionError::Client(e.to_string()))
        } else {
            Ok(())
        };

        match tokio::time::timeout(DISCONNECT_GRACE, &mut connection.handle).await {
            Ok(Ok(())) => debug!(client_id = %self.client_id, "Event loop task shut down"),
            Ok(Err(e)) if !e.is_cancelled() => {
                warn!(client_id = %self.client_id, "Event loop task ended with error: {}", e);
            }
            Err(_) => {
                warn!(client_id = %self.client_id, "Event loop task didn't stop, aborting");
                connection.handle.abort();
            }
            _ => {}
        }

        result
    }

    fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        let mut live = self.live.lock().await;
        let connection = self.connected(&mut live)?;

        connection
            .client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| SessionError::Client(e.to_string()))?;
        let ticket = connection.tracker.request(AckKind::Publish);

        let name = match qos {
            QoS::AtMostOnce => return Ok(()),
            QoS::AtLeastOnce => "PUBACK",
            QoS::ExactlyOnce => "PUBCOMP",
        };

        match Self::wait_for_ack(
            &mut connection.acks,
            &mut connection.tracker,
            AckKind::Publish,
            ticket,
            name,
            self.config.timeout,
        )
        .await?
        {
            None => Ok(()),
            Some(code) => Err(SessionError::PublishRejected(code)),
        }
    }

    async fn enqueue_publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        let mut live = self.live.lock().await;
        let connection = self.connected(&mut live)?;
        connection
            .client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| SessionError::Client(e.to_string()))?;
        connection.tracker.request(AckKind::Publish);
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        on_message: MessageCallback,
    ) -> Result<(), SessionError> {
        let mut live = self.live.lock().await;
        let connection = self.connected(&mut live)?;

        lock_subscriptions(&self.subscriptions).push((filter.to_string(), on_message.clone()));

        let result = async {
            connection
                .client
                .subscribe(filter, qos)
                .await
                .map_err(|e| SessionError::Client(e.to_string()))?;
            let ticket = connection.tracker.request(AckKind::Subscribe);
            match Self::wait_for_ack(
                &mut connection.acks,
                &mut connection.tracker,
                AckKind::Subscribe,
                ticket,
                "SUBACK",
                self.config.timeout,
            )
            .await?
            {
                None => Ok(()),
                Some(code) => Err(SessionError::SubscribeRejected(code)),
            }
        }
        .await;

        if result.is_err() {
            self.remove_subscription(&on_message);
        }
        result
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // No async work in Drop; only make sure the event loop task goes away
        if let Some(connection) = self.live.get_mut().take() {
            connection.handle.abort();
        }
    }
}

/// Creates [`MqttSession`]s for one broker
#[derive(Debug, Clone)]
pub struct MqttSessionFactory {
    config: Arc<ConnectionConfig>,
}

impl MqttSessionFactory {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl SessionFactory for MqttSessionFactory {
    type Session = MqttSession;

    fn create_session(&self, client_id: Option<&str>) -> Result<MqttSession, SessionError> {
        let client_id = match client_id {
            Some(id) => id.to_string(),
            None => generate_client_id(self.config.client_id_prefix.as_deref()),
        };
        validate_client_id(&client_id)?;
        Ok(MqttSession::new(client_id, self.config.clone()))
    }
}
