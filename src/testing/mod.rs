//! Testing utilities and mock implementations
//!
//! This module provides an in-memory broker for exercising the probes
//! without a running MQTT server.

pub mod mocks;

pub use mocks::*;
