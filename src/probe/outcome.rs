//! Probe outcomes and result aggregates

use super::boundary::TrialOutcome;
use super::signal::WaitOutcome;
use crate::transport::{ConnectAck, QoS, ReasonCode};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Classified result of one probe attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProbeOutcome {
    Ok,
    Timeout,
    Interrupted,
    PublishFailed,
    SubscribeFailed,
    WrongPayload,
    NotShared,
    Undefined(String),
}

impl ProbeOutcome {
    pub fn undefined(reason: impl fmt::Display) -> Self {
        ProbeOutcome::Undefined(reason.to_string())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Ok)
    }
}

impl From<WaitOutcome> for ProbeOutcome {
    fn from(wait: WaitOutcome) -> Self {
        match wait {
            WaitOutcome::Fired => ProbeOutcome::Ok,
            WaitOutcome::TimedOut => ProbeOutcome::Timeout,
            WaitOutcome::Interrupted => ProbeOutcome::Interrupted,
        }
    }
}

impl TrialOutcome for ProbeOutcome {
    fn is_success(&self) -> bool {
        self.is_ok()
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Ok => f.write_str("OK"),
            ProbeOutcome::Timeout => f.write_str("TIME_OUT"),
            ProbeOutcome::Interrupted => f.write_str("INTERRUPTED"),
            ProbeOutcome::PublishFailed => f.write_str("PUBLISH_FAILED"),
            ProbeOutcome::SubscribeFailed => f.write_str("SUBSCRIBE_FAILED"),
            ProbeOutcome::WrongPayload => f.write_str("WRONG_PAYLOAD"),
            ProbeOutcome::NotShared => f.write_str("NOT_SHARED"),
            ProbeOutcome::Undefined(reason) => write!(f, "UNDEFINED ({reason})"),
        }
    }
}

/// Result of a connection attempt: the broker's CONNACK, or a transport fault
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectOutcome {
    Acknowledged(ConnectAck),
    Undefined(String),
}

impl ConnectOutcome {
    /// Reason code of the CONNACK, if one arrived
    pub fn code(&self) -> Option<&ReasonCode> {
        match self {
            ConnectOutcome::Acknowledged(ack) => Some(&ack.code),
            ConnectOutcome::Undefined(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code().is_some_and(ReasonCode::is_success)
    }
}

impl TrialOutcome for ConnectOutcome {
    fn is_success(&self) -> bool {
        ConnectOutcome::is_success(self)
    }
}

impl fmt::Display for ConnectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectOutcome::Acknowledged(ack) => write!(f, "{}", ack.code),
            ConnectOutcome::Undefined(reason) => write!(f, "UNDEFINED_FAILURE ({reason})"),
        }
    }
}

/// One boundary trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizedProbeResult<T> {
    pub size: usize,
    pub outcome: T,
}

/// Result of a boundary search
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult<T> {
    /// Last size the search examined, whatever its own outcome
    pub boundary: usize,
    /// Every trial in the order it ran
    pub trials: Vec<SizedProbeResult<T>>,
}

impl<T: TrialOutcome> DiscoveryResult<T> {
    /// Largest size with a successful trial, `None` when every trial failed
    pub fn largest_success(&self) -> Option<usize> {
        self.trials
            .iter()
            .filter(|trial| trial.outcome.is_success())
            .map(|trial| trial.size)
            .max()
    }
}

/// Delivery statistics of the QoS probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QosProbeResult {
    #[serde(serialize_with = "serialize_qos")]
    pub qos: QoS,
    pub repetitions: u32,
    /// Matching deliveries, never more than `repetitions`
    pub received: u32,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// `Ok` when every publish arrived, `Timeout` on partial delivery
    pub outcome: ProbeOutcome,
}

/// Single-level and multi-level wildcard results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WildcardProbeResult {
    pub single_level: ProbeOutcome,
    pub multi_level: ProbeOutcome,
}

/// CONNACK outcome for one identifier character
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharProbeResult {
    pub character: char,
    pub outcome: ConnectOutcome,
}

/// Identifier character scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierCharsResult {
    /// The whole candidate set was accepted in one identifier
    pub all_accepted: bool,
    /// Per-character outcomes, empty when `all_accepted`
    pub characters: Vec<CharProbeResult>,
}

impl IdentifierCharsResult {
    /// Characters the broker did not accept
    pub fn rejected(&self) -> impl Iterator<Item = &CharProbeResult> {
        self.characters
            .iter()
            .filter(|result| !result.outcome.is_success())
    }
}

/// Protocol name of a QoS level, also used as the QoS probe payload
pub fn qos_label(qos: QoS) -> &'static str {
    match qos {
        QoS::AtMostOnce => "AT_MOST_ONCE",
        QoS::AtLeastOnce => "AT_LEAST_ONCE",
        QoS::ExactlyOnce => "EXACTLY_ONCE",
    }
}

/// Numeric QoS level
pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Parse a numeric QoS level
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

fn serialize_qos<S: Serializer>(qos: &QoS, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(qos_level(*qos))
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
