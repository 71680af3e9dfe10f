//! Pure connection setup for probe sessions
//!
//! Builds rumqttc options from a [`ConnectionConfig`] and tracks the
//! connection state published by the event loop task.

use crate::config::{ConnectionConfig, TlsMaterial};
use crate::transport::SessionError;
use rumqttc::v5::MqttOptions;
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use std::time::Duration;
use uuid::Uuid;

/// Keep alive for probe sessions
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Largest packet the probe accepts from the broker (MQTT's own ceiling)
pub const MAX_PACKET_SIZE: u32 = 268_435_455;

/// Length of generated client identifiers. Every broker must accept 1-23 characters.
pub const GENERATED_CLIENT_ID_LEN: usize = 23;

/// Connection state for a probe session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Created, never connected
    Idle,
    /// CONNECT sent, waiting for the CONNACK
    Connecting,
    /// CONNACK with a success code received
    Connected,
    /// Closed by either side, with reason
    Disconnected(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Random suffix length used after a configured prefix
const PREFIXED_SUFFIX_LEN: usize = 8;

/// Random client identifier, short enough for any compliant broker when no
/// prefix is configured
pub fn generate_client_id(prefix: Option<&str>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    match prefix {
        Some(prefix) => format!("{prefix}{}", &random[..PREFIXED_SUFFIX_LEN]),
        None => random[..GENERATED_CLIENT_ID_LEN].to_string(),
    }
}

/// Reject identifiers the client library refuses to build options for
///
/// Empty identifiers and identifiers starting with a space never reach the
/// broker; the probe treats them as a client-side rejection.
pub fn validate_client_id(client_id: &str) -> Result<(), SessionError> {
    if client_id.is_empty() || client_id.starts_with(' ') {
        return Err(SessionError::InvalidClientId(client_id.to_string()));
    }
    Ok(())
}

/// Build MQTT options for one session
pub fn configure_mqtt_options(
    client_id: &str,
    config: &ConnectionConfig,
) -> Result<MqttOptions, SessionError> {
    validate_client_id(client_id)?;

    let mut mqtt_options = MqttOptions::new(client_id, config.host.as_str(), config.port);
    mqtt_options.set_keep_alive(KEEP_ALIVE);
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    if let Some(tls) = &config.tls {
        mqtt_options.set_transport(tls_transport(tls)?);
    }

    // Password-only authentication goes out with an empty user name
    if config.username.is_some() || config.password.is_some() {
        let username = config.username.clone().unwrap_or_default();
        let password = config
            .password
            .as_ref()
            .map(|secret| String::from_utf8_lossy(secret.expose()).into_owned())
            .unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    Ok(mqtt_options)
}

/// Map TLS material onto a rumqttc transport
pub fn tls_transport(tls: &TlsMaterial) -> Result<RumqttcTransport, SessionError> {
    match (&tls.ca, &tls.client_auth) {
        (None, None) => Ok(RumqttcTransport::tls_with_default_config()),
        (None, Some(_)) => Err(SessionError::Tls(
            "client certificate authentication requires a CA certificate".to_string(),
        )),
        (Some(ca), client_auth) => Ok(RumqttcTransport::tls_with_config(
            TlsConfiguration::Simple {
                ca: ca.clone(),
                alpn: None,
                client_auth: client_auth.clone(),
            },
        )),
    }
}
