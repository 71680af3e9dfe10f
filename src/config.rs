//! Configuration for broker probing
//!
//! Two layers live here:
//!
//! - [`ProbeConfig`] is the TOML file format (and what the CLI fills in when
//!   no file is given). It names environment variables and files instead of
//!   holding secrets directly.
//! - [`ConnectionConfig`] is the immutable, resolved connection description the
//!   probing engine consumes. It owns the password and TLS material.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default wait for every acknowledgement and delivery
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest topic length the MQTT wire format can express
pub const MAX_TOPIC_LENGTH: usize = 65535;

/// Largest client identifier length the MQTT wire format can express
pub const MAX_CLIENT_ID_LENGTH: usize = 65535;

/// Opaque secret bytes (passwords). Never printed.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Access the raw secret bytes
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

/// TLS material for the transport layer
///
/// With no CA the platform's default roots are used.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct TlsMaterial {
    /// PEM encoded CA certificate(s)
    pub ca: Option<Vec<u8>>,
    /// PEM encoded client certificate and private key
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca", &self.ca.as_ref().map(|ca| format!("{} bytes", ca.len())))
            .field("client_auth", &self.client_auth.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Resolved connection parameters shared by every probe session
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub tls: Option<TlsMaterial>,
    /// Prefix for generated client identifiers. Every session still gets a
    /// unique identifier.
    pub client_id_prefix: Option<String>,
    /// Bound for every acknowledgement and delivery wait
    pub timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            tls: None,
            client_id_prefix: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build from a broker URL: `mqtt://host[:port]` or `mqtts://host[:port]`
    pub fn from_broker_url(broker_url: &str) -> Result<Self, ConfigError> {
        let (host, port, tls) = parse_broker_url(broker_url)?;
        let mut config = Self::new(host, port);
        if tls {
            config.tls = Some(TlsMaterial::default());
        }
        Ok(config)
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<Secret>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_client_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_id_prefix = Some(prefix.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Probe configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub probe: ProbeSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL with protocol and optional port
    pub url: String,
    pub username: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    /// Prefix for the random client identifiers of probe sessions
    pub client_id_prefix: Option<String>,
    pub tls: Option<TlsSection>,
}

/// TLS file locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TlsSection {
    pub ca_file: Option<PathBuf>,
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
}

/// Probe tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Publishes per QoS level in the delivery probe
    #[serde(default = "default_qos_repetitions")]
    pub qos_repetitions: u32,
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    #[serde(default = "default_max_topic_length")]
    pub max_topic_length: usize,
    #[serde(default = "default_max_client_id_length")]
    pub max_client_id_length: usize,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            qos_repetitions: default_qos_repetitions(),
            max_payload_size: default_max_payload_size(),
            max_topic_length: default_max_topic_length(),
            max_client_id_length: default_max_client_id_length(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_qos_repetitions() -> u32 {
    10
}

fn default_max_payload_size() -> usize {
    65536
}

fn default_max_topic_length() -> usize {
    MAX_TOPIC_LENGTH
}

fn default_max_client_id_length() -> usize {
    MAX_CLIENT_ID_LENGTH
}

/// Logging overrides. Unset fields fall back to `LOG_LEVEL` / `LOG_FORMAT`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProbeConfig {
    /// Minimal configuration for a broker URL with default probe settings
    pub fn for_broker(url: impl Into<String>) -> Self {
        Self {
            broker: BrokerSection {
                url: url.into(),
                username: None,
                password_env: None,
                client_id_prefix: None,
                tls: None,
            },
            probe: ProbeSection::default(),
            logging: LoggingSection::default(),
        }
    }

    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ProbeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency without touching the environment or files
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_broker_url(&self.broker.url)?;

        if self.probe.timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "probe.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.probe.qos_repetitions == 0 {
            return Err(ConfigError::InvalidConfig(
                "probe.qos_repetitions must be greater than 0".to_string(),
            ));
        }
        if let Some(tls) = &self.broker.tls {
            if tls.client_cert_file.is_some() != tls.client_key_file.is_some() {
                return Err(ConfigError::InvalidConfig(
                    "broker.tls.client_cert_file and client_key_file must be set together"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Probe timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }

    /// Resolve secrets and TLS files into a [`ConnectionConfig`]
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        self.validate()?;

        let mut config = ConnectionConfig::from_broker_url(&self.broker.url)?
            .with_credentials(self.broker.username.clone(), self.resolve_password()?)
            .with_timeout(self.timeout());

        if let Some(prefix) = &self.broker.client_id_prefix {
            config = config.with_client_id_prefix(prefix.clone());
        }

        if let Some(tls) = &self.broker.tls {
            config = config.with_tls(load_tls_material(tls)?);
        }

        Ok(config)
    }

    fn resolve_password(&self) -> Result<Option<Secret>, ConfigError> {
        match &self.broker.password_env {
            Some(name) => std::env::var(name)
                .map(|value| Some(Secret::from(value)))
                .map_err(|_| ConfigError::EnvVarNotFound(name.clone())),
            None => Ok(None),
        }
    }
}

fn load_tls_material(section: &TlsSection) -> Result<TlsMaterial, ConfigError> {
    let ca = section.ca_file.as_ref().map(std::fs::read).transpose()?;
    let client_auth = match (&section.client_cert_file, &section.client_key_file) {
        (Some(cert), Some(key)) => Some((std::fs::read(cert)?, std::fs::read(key)?)),
        _ => None,
    };
    Ok(TlsMaterial { ca, client_auth })
}

/// Split a broker URL into host, port and whether TLS is requested
fn parse_broker_url(broker_url: &str) -> Result<(String, u16, bool), ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}
