//! Transport layer for probe sessions
//!
//! Probes never talk to rumqttc directly. They go through [`BrokerSession`]
//! and [`SessionFactory`], which lets the probing engine run against the real
//! MQTT client ([`mqtt::MqttSessionFactory`]) or the in-memory broker used in
//! tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod mqtt;
pub mod scope;

pub use rumqttc::v5::mqttbytes::QoS;
pub use scope::SessionScope;

/// Broker reason code, kept as its protocol name (e.g. `Success`, `NotAuthorized`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ReasonCode(String);

impl ReasonCode {
    pub const SUCCESS: &'static str = "Success";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn success() -> Self {
        Self::new(Self::SUCCESS)
    }

    /// Build from the `Debug` name of any rumqttc reason code enum
    pub fn from_debug(code: &impl fmt::Debug) -> Self {
        Self(format!("{code:?}"))
    }

    pub fn is_success(&self) -> bool {
        self.0 == Self::SUCCESS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// CONNACK as seen by a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectAck {
    pub code: ReasonCode,
    pub session_present: bool,
}

impl ConnectAck {
    pub fn success(session_present: bool) -> Self {
        Self {
            code: ReasonCode::success(),
            session_present,
        }
    }
}

/// A message delivered to a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Delivery callback. Runs on the session's event loop task and must not block.
pub type MessageCallback = Arc<dyn Fn(&Delivery) + Send + Sync>;

/// Errors at the session boundary
///
/// Rejections carried by a broker acknowledgement are separated from
/// transport faults by [`SessionError::is_rejection`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Connection rejected by broker: {0}")]
    ConnectRejected(ReasonCode),
    #[error("Publish rejected by broker: {0}")]
    PublishRejected(ReasonCode),
    #[error("Subscribe rejected by broker: {0}")]
    SubscribeRejected(ReasonCode),
    #[error("Timed out waiting for {0}")]
    AckTimeout(&'static str),
    #[error("Invalid client identifier: {0:?}")]
    InvalidClientId(String),
    #[error("Session is not connected")]
    NotConnected,
    #[error("Client request failed: {0}")]
    Client(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

impl SessionError {
    /// True when the broker answered with a failure reason code
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectRejected(_)
                | SessionError::PublishRejected(_)
                | SessionError::SubscribeRejected(_)
        )
    }
}

/// One client connection to the broker under test
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Client identifier this session connects with
    fn client_id(&self) -> &str;

    /// Connect and wait for the CONNACK
    async fn connect(&self) -> Result<ConnectAck, SessionError>;

    /// Disconnect. A no-op on a session that is not connected.
    async fn disconnect(&self) -> Result<(), SessionError>;

    fn is_connected(&self) -> bool;

    /// Publish and wait for the broker's acknowledgement (PUBACK / PUBCOMP)
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError>;

    /// Queue a publish without waiting for any acknowledgement
    async fn enqueue_publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), SessionError>;

    /// Subscribe and wait for the SUBACK. `on_message` is registered before the
    /// SUBSCRIBE is sent so retained deliveries are not missed.
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        on_message: MessageCallback,
    ) -> Result<(), SessionError>;
}

/// Builds sessions from the shared connection configuration
pub trait SessionFactory: Send + Sync {
    type Session: BrokerSession + 'static;

    /// Create an unconnected session. `client_id` overrides the configured or
    /// generated identifier.
    fn create_session(&self, client_id: Option<&str>) -> Result<Self::Session, SessionError>;
}

/// Disconnect a session if it reports itself connected. Failures are logged.
pub async fn disconnect_if_connected<S: BrokerSession + ?Sized>(session: &S) {
    if !session.is_connected() {
        return;
    }
    if let Err(e) = session.disconnect().await {
        tracing::debug!(client_id = %session.client_id(), "Disconnect failed: {}", e);
    }
}
