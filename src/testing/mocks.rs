//! In-memory MQTT broker for testing
//!
//! [`MockBroker`] implements [`SessionFactory`] so every probe can run without
//! a network. Its behaviour is configured with builder methods: limits on
//! payload size, topic length and client identifier length, refused identifier
//! characters, retained/wildcard/shared subscription support and a maximum QoS.
//! Deliveries are dispatched synchronously from `publish`, after the broker
//! state lock has been released.

use crate::probe::qos_level;
use crate::topics::{split_shared, topic_matches};
use crate::transport::mqtt::{generate_client_id, validate_client_id};
use crate::transport::{
    BrokerSession, ConnectAck, Delivery, MessageCallback, QoS, ReasonCode, SessionError,
    SessionFactory,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// How the broker enforces its payload limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitMode {
    /// PUBACK with `PacketTooLarge`
    #[default]
    Reject,
    /// Acknowledge, never deliver
    Drop,
    /// Deliver the payload cut to the limit
    Truncate,
    /// Close the publisher's connection
    Disconnect,
}

/// How the broker treats `$share/` subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharedMode {
    /// One subscriber per group receives each message
    #[default]
    Shared,
    /// Every subscriber receives each message
    FanOut,
    /// SUBACK with `SharedSubscriptionsNotSupported`
    Unsupported,
}

#[derive(Debug, Clone)]
struct MockBehaviour {
    online: bool,
    max_payload: Option<(usize, LimitMode)>,
    max_topic_length: Option<usize>,
    max_client_id_length: Option<usize>,
    rejected_chars: Vec<char>,
    rejected_chars_code: ReasonCode,
    retain: bool,
    wildcards: bool,
    shared: SharedMode,
    max_qos: QoS,
    refused_publish: Option<ReasonCode>,
    refused_subscribe: Option<ReasonCode>,
    duplicate_deliveries: bool,
}

impl Default for MockBehaviour {
    fn default() -> Self {
        Self {
            online: true,
            max_payload: None,
            max_topic_length: None,
            max_client_id_length: None,
            rejected_chars: Vec::new(),
            rejected_chars_code: ReasonCode::new("ClientIdentifierNotValid"),
            retain: true,
            wildcards: true,
            shared: SharedMode::Shared,
            max_qos: QoS::ExactlyOnce,
            refused_publish: None,
            refused_subscribe: None,
            duplicate_deliveries: false,
        }
    }
}

struct Subscription {
    client_id: String,
    filter: String,
    group: Option<String>,
    qos: QoS,
    callback: MessageCallback,
}

#[derive(Default)]
struct BrokerState {
    clients: HashMap<String, Arc<AtomicBool>>,
    subscriptions: Vec<Subscription>,
    retained: HashMap<String, (Bytes, QoS)>,
    shared_cursor: HashMap<String, usize>,
    connects: Vec<String>,
    disconnects: usize,
}

impl BrokerState {
    fn drop_client(&mut self, client_id: &str) {
        if let Some(flag) = self.clients.remove(client_id) {
            flag.store(false, Ordering::SeqCst);
        }
        self.subscriptions.retain(|sub| sub.client_id != client_id);
    }
}

/// In-memory broker shared by every session it creates
#[derive(Clone, Default)]
pub struct MockBroker {
    behaviour: Arc<MockBehaviour>,
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(mut self, apply: impl FnOnce(&mut MockBehaviour)) -> Self {
        apply(Arc::make_mut(&mut self.behaviour));
        self
    }

    /// Refuse every connection at the transport level
    pub fn offline(self) -> Self {
        self.configure(|b| b.online = false)
    }

    pub fn with_max_payload(self, max: usize, mode: LimitMode) -> Self {
        self.configure(|b| b.max_payload = Some((max, mode)))
    }

    /// Refuse topics and filters longer than `max` bytes
    pub fn with_max_topic_length(self, max: usize) -> Self {
        self.configure(|b| b.max_topic_length = Some(max))
    }

    /// Answer longer identifiers with `ClientIdentifierNotValid`
    pub fn with_max_client_id_length(self, max: usize) -> Self {
        self.configure(|b| b.max_client_id_length = Some(max))
    }

    /// Answer identifiers containing any of `chars` with `code`
    pub fn rejecting_chars(self, chars: &str, code: &str) -> Self {
        let chars: Vec<char> = chars.chars().collect();
        let code = ReasonCode::new(code);
        self.configure(|b| {
            b.rejected_chars = chars;
            b.rejected_chars_code = code;
        })
    }

    /// Accept retained publishes without storing them
    pub fn without_retain(self) -> Self {
        self.configure(|b| b.retain = false)
    }

    pub fn without_wildcards(self) -> Self {
        self.configure(|b| b.wildcards = false)
    }

    pub fn with_shared_mode(self, mode: SharedMode) -> Self {
        self.configure(|b| b.shared = mode)
    }

    /// Downgrade every delivery to at most `qos`
    pub fn with_max_qos(self, qos: QoS) -> Self {
        self.configure(|b| b.max_qos = qos)
    }

    /// Answer every valid publish with `code`
    pub fn refusing_publishes(self, code: &str) -> Self {
        let code = ReasonCode::new(code);
        self.configure(|b| b.refused_publish = Some(code))
    }

    /// Answer every valid subscription with `code`
    pub fn refusing_subscriptions(self, code: &str) -> Self {
        let code = ReasonCode::new(code);
        self.configure(|b| b.refused_subscribe = Some(code))
    }

    /// Deliver every message twice to each receiving subscription
    pub fn duplicating_deliveries(self) -> Self {
        self.configure(|b| b.duplicate_deliveries = true)
    }

    /// Sessions currently connected
    pub fn connected_clients(&self) -> usize {
        self.lock().clients.len()
    }

    /// Client identifiers of every accepted connection, in order
    pub fn connect_log(&self) -> Vec<String> {
        self.lock().connects.clone()
    }

    /// Disconnects requested by connected sessions
    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    /// Topics holding a retained message
    pub fn retained_topics(&self) -> Vec<String> {
        self.lock().retained.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn connect(&self, client_id: &str, flag: &Arc<AtomicBool>) -> Result<ConnectAck, SessionError> {
        let behaviour = &self.behaviour;
        if !behaviour.online {
            return Err(SessionError::Connection(
                "Connection refused: broker offline".to_string(),
            ));
        }
        if behaviour
            .max_client_id_length
            .is_some_and(|max| client_id.len() > max)
        {
            return Ok(refused("ClientIdentifierNotValid"));
        }
        if client_id.chars().any(|c| behaviour.rejected_chars.contains(&c)) {
            return Ok(ConnectAck {
                code: behaviour.rejected_chars_code.clone(),
                session_present: false,
            });
        }

        let mut state = self.lock();
        // Session takeover
        state.drop_client(client_id);
        flag.store(true, Ordering::SeqCst);
        state.clients.insert(client_id.to_string(), flag.clone());
        state.connects.push(client_id.to_string());
        Ok(ConnectAck::success(false))
    }

    fn disconnect(&self, client_id: &str) {
        let mut state = self.lock();
        state.drop_client(client_id);
        state.disconnects += 1;
    }

    fn subscribe(
        &self,
        client_id: &str,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), SessionError> {
        let behaviour = &self.behaviour;
        let (group, inner) = match split_shared(filter) {
            Some((group, inner)) => (Some(group.to_string()), inner),
            None => (None, filter),
        };

        if inner.is_empty() || self.too_long(inner) {
            return Err(rejected_subscribe("TopicFilterInvalid"));
        }
        if group.is_some() && behaviour.shared == SharedMode::Unsupported {
            return Err(rejected_subscribe("SharedSubscriptionsNotSupported"));
        }
        if !behaviour.wildcards && (inner.contains('+') || inner.contains('#')) {
            return Err(rejected_subscribe("WildcardSubscriptionsNotSupported"));
        }
        if let Some(code) = &behaviour.refused_subscribe {
            return Err(SessionError::SubscribeRejected(code.clone()));
        }

        let granted = min_qos(qos, behaviour.max_qos);
        let retained: Vec<Delivery> = {
            let mut state = self.lock();
            state.subscriptions.push(Subscription {
                client_id: client_id.to_string(),
                filter: inner.to_string(),
                group: group.clone(),
                qos: granted,
                callback: callback.clone(),
            });
            if group.is_some() {
                Vec::new()
            } else {
                state
                    .retained
                    .iter()
                    .filter(|(topic, _)| topic_matches(inner, topic))
                    .map(|(topic, (payload, stored_qos))| Delivery {
                        topic: topic.clone(),
                        payload: payload.clone(),
                        qos: min_qos(*stored_qos, granted),
                        retain: true,
                    })
                    .collect()
            }
        };

        for delivery in &retained {
            callback(delivery);
        }
        Ok(())
    }

    fn publish(
        &self,
        client_id: &str,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        let behaviour = &self.behaviour;
        if topic.is_empty() || topic.contains(['+', '#']) || self.too_long(topic) {
            return Err(SessionError::PublishRejected(ReasonCode::new("TopicNameInvalid")));
        }
        if let Some(code) = &behaviour.refused_publish {
            return Err(SessionError::PublishRejected(code.clone()));
        }

        let mut payload = payload;
        if let Some((max, mode)) = behaviour.max_payload {
            if payload.len() > max {
                match mode {
                    LimitMode::Reject => {
                        return Err(SessionError::PublishRejected(ReasonCode::new(
                            "PacketTooLarge",
                        )))
                    }
                    LimitMode::Drop => return Ok(()),
                    LimitMode::Truncate => payload.truncate(max),
                    LimitMode::Disconnect => {
                        self.lock().drop_client(client_id);
                        return Err(SessionError::Connection(
                            "Connection closed by broker".to_string(),
                        ));
                    }
                }
            }
        }

        let deliveries: Vec<(MessageCallback, Delivery)> = {
            let mut state = self.lock();
            if retain && behaviour.retain {
                if payload.is_empty() {
                    state.retained.remove(topic);
                } else {
                    state.retained.insert(topic.to_string(), (payload.clone(), qos));
                }
            }
            self.route(&mut state, topic, &payload, qos)
        };

        for (callback, delivery) in &deliveries {
            callback(delivery);
        }
        Ok(())
    }

    /// Pick the receiving subscriptions for one message
    fn route(
        &self,
        state: &mut BrokerState,
        topic: &str,
        payload: &Bytes,
        qos: QoS,
    ) -> Vec<(MessageCallback, Delivery)> {
        let mut deliveries = Vec::new();
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();

        for (index, sub) in state.subscriptions.iter().enumerate() {
            if !topic_matches(&sub.filter, topic) {
                continue;
            }
            match &sub.group {
                Some(group) if self.behaviour.shared == SharedMode::Shared => groups
                    .entry(format!("{group}/{}", sub.filter))
                    .or_default()
                    .push(index),
                _ => deliveries.push(index),
            }
        }

        for (key, members) in groups {
            let cursor = state.shared_cursor.entry(key).or_insert(0);
            deliveries.push(members[*cursor % members.len()]);
            *cursor += 1;
        }

        if self.behaviour.duplicate_deliveries {
            deliveries = deliveries.into_iter().flat_map(|index| [index, index]).collect();
        }

        deliveries
            .into_iter()
            .map(|index| {
                let sub = &state.subscriptions[index];
                let delivery = Delivery {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    qos: min_qos(min_qos(qos, sub.qos), self.behaviour.max_qos),
                    retain: false,
                };
                (sub.callback.clone(), delivery)
            })
            .collect()
    }

    fn too_long(&self, topic: &str) -> bool {
        self.behaviour
            .max_topic_length
            .is_some_and(|max| topic.len() > max)
    }
}

impl SessionFactory for MockBroker {
    type Session = MockSession;

    fn create_session(&self, client_id: Option<&str>) -> Result<MockSession, SessionError> {
        let client_id = match client_id {
            Some(id) => id.to_string(),
            None => generate_client_id(None),
        };
        validate_client_id(&client_id)?;
        Ok(MockSession {
            client_id,
            broker: self.clone(),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Session against a [`MockBroker`]
pub struct MockSession {
    client_id: String,
    broker: MockBroker,
    connected: Arc<AtomicBool>,
}

impl MockSession {
    fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn connect(&self) -> Result<ConnectAck, SessionError> {
        self.broker.connect(&self.client_id, &self.connected)
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            self.broker.disconnect(&self.client_id);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        self.ensure_connected()?;
        self.broker
            .publish(&self.client_id, topic, payload, qos, retain)
    }

    async fn enqueue_publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError> {
        self.ensure_connected()?;
        // Acknowledgement-carrying rejections never reach a fire-and-forget caller
        match self
            .broker
            .publish(&self.client_id, topic, payload, qos, retain)
        {
            Err(e) if e.is_rejection() => Ok(()),
            other => other,
        }
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        on_message: MessageCallback,
    ) -> Result<(), SessionError> {
        self.ensure_connected()?;
        self.broker
            .subscribe(&self.client_id, filter, qos, on_message)
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if self.is_connected() {
            let mut state = self.broker.lock();
            let owns_slot = state
                .clients
                .get(&self.client_id)
                .is_some_and(|flag| Arc::ptr_eq(flag, &self.connected));
            if owns_slot {
                state.drop_client(&self.client_id);
            }
        }
    }
}

fn refused(code: &str) -> ConnectAck {
    ConnectAck {
        code: ReasonCode::new(code),
        session_present: false,
    }
}

fn rejected_subscribe(code: &str) -> SessionError {
    SessionError::SubscribeRejected(ReasonCode::new(code))
}

fn min_qos(a: QoS, b: QoS) -> QoS {
    if qos_level(a) <= qos_level(b) {
        a
    } else {
        b
    }
}
