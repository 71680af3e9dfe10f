//! MQTT 5 broker capability probing
//!
//! Connects to a broker under test and discovers what it supports and where
//! its limits are: connectivity, shared subscriptions, QoS 0/1/2 delivery,
//! retained messages, wildcard subscriptions, and by binary search the maximum
//! payload size, topic length and client identifier length, plus the
//! punctuation characters allowed in client identifiers.
//!
//! # Overview
//!
//! - [`probe`] - the probes, the boundary search and the suite orchestrator
//! - [`transport`] - the session seam and its rumqttc implementation
//! - [`config`] - TOML configuration and connection settings
//! - [`report`] - pretty and JSON rendering of results
//! - [`observability`] - structured logging
//! - [`testing`] - an in-memory broker for tests
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_probe::config::ConnectionConfig;
//! use mqtt_probe::probe::{CapabilityProber, ProbeSettings};
//! use mqtt_probe::transport::mqtt::MqttSessionFactory;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::from_broker_url("mqtt://localhost:1883")?;
//! let mut prober = CapabilityProber::new(MqttSessionFactory::new(config), ProbeSettings::default());
//!
//! let report = prober.run_all().await;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod probe;
pub mod report;
pub mod testing;
pub mod topics;
pub mod transport;

pub use config::{ConfigError, ConnectionConfig, ProbeConfig};
pub use error::{ProbeError, ProbeResult};
pub use probe::{CapabilityProber, ProbeOutcome, ProbeReport, ProbeSettings};
pub use transport::{BrokerSession, SessionError, SessionFactory};
