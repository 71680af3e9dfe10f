//! Error types for the probe setup path
//!
//! Probes themselves never fail; they reduce every problem to an outcome.
//! [`ProbeError`] covers what can go wrong around them: loading configuration,
//! building sessions, reading input and writing the report.

use crate::config::ConfigError;
use crate::transport::SessionError;
use thiserror::Error;

/// Main error type for probe runs
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProbeError {
    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Result type for probe setup operations
pub type ProbeResult<T> = Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_constructor() {
        let error = ProbeError::invalid_input("QoS level 3");
        assert!(matches!(error, ProbeError::InvalidInput { .. }));
        assert_eq!(error.to_string(), "Invalid input: QoS level 3");
    }

    #[test]
    fn test_from_config_error() {
        let error: ProbeError = ConfigError::InvalidBrokerUrl("nope".to_string()).into();
        assert!(matches!(error, ProbeError::Config(_)));
        assert!(error.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_from_session_error() {
        let error: ProbeError = SessionError::NotConnected.into();
        assert!(matches!(error, ProbeError::Session(SessionError::NotConnected)));
    }

    #[test]
    fn test_from_io_error() {
        let error: ProbeError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed").into();
        assert!(error.to_string().contains("closed"));
    }
}
