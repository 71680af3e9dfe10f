//! MQTT 5 implementation of the session seam, built on rumqttc
//!
//! - [`connection`] - pure option building and connection state
//! - [`message_handler`] - pure event routing and delivery dispatch
//! - [`client`] - the session itself: event loop task, acknowledgement waits, teardown

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttSession, MqttSessionFactory};
pub use connection::{
    configure_mqtt_options, generate_client_id, validate_client_id, ConnectionState,
};
pub use message_handler::{EventRoute, MessageHandler};
