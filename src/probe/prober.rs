//! Capability prober orchestrator
//!
//! [`CapabilityProber`] owns the session factory and probe settings and
//! exposes one method per probe. The feature probes live in
//! [`super::features`], the boundary probes in [`super::limits`]. Probes run
//! one at a time; the only state shared between them is the discovered safe
//! topic length.

use super::outcome::{
    ConnectOutcome, DiscoveryResult, IdentifierCharsResult, ProbeOutcome, QosProbeResult,
    WildcardProbeResult,
};
use super::signal::{Interrupt, InterruptHandle};
use crate::config::ProbeSection;
use crate::probe_span;
use crate::topics::random_topic;
use crate::transport::{
    BrokerSession, ConnectAck, QoS, SessionError, SessionFactory, SessionScope,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Tuning for a probe run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Bound for every acknowledgement and delivery wait
    pub timeout: Duration,
    /// Publishes per QoS level in the full suite
    pub qos_repetitions: u32,
    /// First candidate of the payload size search
    pub max_payload_size: usize,
    /// First candidate of the topic length search
    pub max_topic_length: usize,
    /// First candidate of the client identifier length search
    pub max_client_id_length: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from(&ProbeSection::default())
    }
}

impl From<&ProbeSection> for ProbeSettings {
    fn from(section: &ProbeSection) -> Self {
        Self {
            timeout: Duration::from_secs(section.timeout_secs),
            qos_repetitions: section.qos_repetitions,
            max_payload_size: section.max_payload_size,
            max_topic_length: section.max_topic_length,
            max_client_id_length: section.max_client_id_length,
        }
    }
}

impl ProbeSettings {
    /// Settings with the given wait bound and default search ranges
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Steps of the full suite after the connect probe, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStep {
    TopicLength,
    SharedSubscription,
    Qos0,
    Qos1,
    Qos2,
    Retain,
    Wildcard,
    PayloadSize,
    ClientIdLength,
    IdentifierChars,
}

impl SuiteStep {
    pub const ALL: [SuiteStep; 10] = [
        SuiteStep::TopicLength,
        SuiteStep::SharedSubscription,
        SuiteStep::Qos0,
        SuiteStep::Qos1,
        SuiteStep::Qos2,
        SuiteStep::Retain,
        SuiteStep::Wildcard,
        SuiteStep::PayloadSize,
        SuiteStep::ClientIdLength,
        SuiteStep::IdentifierChars,
    ];
}

/// Everything the full suite found out about a broker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub connect: ConnectOutcome,
    pub topic_length: Option<DiscoveryResult<ProbeOutcome>>,
    pub shared_subscription: Option<ProbeOutcome>,
    pub qos: Vec<QosProbeResult>,
    pub retain: Option<ProbeOutcome>,
    pub wildcard: Option<WildcardProbeResult>,
    pub payload_size: Option<DiscoveryResult<ProbeOutcome>>,
    pub client_id_length: Option<DiscoveryResult<ConnectOutcome>>,
    pub identifier_chars: Option<IdentifierCharsResult>,
    /// Steps that did not run, because the connection was refused or the run was interrupted
    pub skipped: Vec<SuiteStep>,
    pub interrupted: bool,
}

impl ProbeReport {
    fn new(started_at: DateTime<Utc>, connect: ConnectOutcome) -> Self {
        Self {
            started_at,
            finished_at: None,
            connect,
            topic_length: None,
            shared_subscription: None,
            qos: Vec::new(),
            retain: None,
            wildcard: None,
            payload_size: None,
            client_id_length: None,
            identifier_chars: None,
            skipped: Vec::new(),
            interrupted: false,
        }
    }
}

/// Public entry point for probing a broker
pub struct CapabilityProber<F: SessionFactory> {
    pub(super) factory: F,
    pub(super) settings: ProbeSettings,
    max_topic_length: Option<usize>,
    interrupt: InterruptHandle,
}

impl<F: SessionFactory> CapabilityProber<F> {
    pub fn new(factory: F, settings: ProbeSettings) -> Self {
        Self {
            factory,
            settings,
            max_topic_length: None,
            interrupt: InterruptHandle::new(),
        }
    }

    /// Prober with default settings and the given timeout
    pub fn with_timeout(factory: F, timeout: Duration) -> Self {
        Self::new(factory, ProbeSettings::with_timeout(timeout))
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Seed the safe topic length used to bound random topics
    pub fn set_max_topic_length(&mut self, max_topic_length: Option<usize>) {
        self.max_topic_length = max_topic_length;
    }

    /// Safe topic length, `None` while unknown
    pub fn max_topic_length(&self) -> Option<usize> {
        self.max_topic_length
    }

    /// Handle that interrupts the waits of this prober (e.g. from a Ctrl-C handler)
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub(super) fn interrupt(&self) -> Interrupt {
        self.interrupt.subscribe()
    }

    pub(super) fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    /// Fresh random topic within the safe topic length
    pub(super) fn topic(&self) -> String {
        random_topic(self.max_topic_length)
    }

    /// Log an unexpected fault and reduce it to `Undefined`
    pub(super) fn unexpected(&self, context: &str, error: SessionError) -> ProbeOutcome {
        error!(error = ?error, "{}: {}", context, error);
        ProbeOutcome::undefined(error)
    }

    /// Classify a failed publish or subscribe. Broker rejections are expected;
    /// anything else is logged.
    pub(super) fn rejected(
        &self,
        context: &str,
        error: SessionError,
        outcome: ProbeOutcome,
    ) -> ProbeOutcome {
        if !error.is_rejection() {
            warn!(error = ?error, "{}: {}", context, error);
        }
        outcome
    }

    /// Connect one scoped session and classify the CONNACK
    ///
    /// A refused connection is still an acknowledgement and keeps its code.
    /// Faults before or during the connect are logged at debug, since
    /// identifier probes provoke them on purpose.
    pub(super) async fn connect_outcome(&self, client_id: Option<&str>) -> ConnectOutcome {
        let mut scope = SessionScope::new(&self.factory);
        let outcome = match scope.open(client_id) {
            Ok(session) => match session.connect().await {
                Ok(ack) => ConnectOutcome::Acknowledged(ack),
                Err(SessionError::ConnectRejected(code)) => ConnectOutcome::Acknowledged(ConnectAck {
                    code,
                    session_present: false,
                }),
                Err(e) => {
                    debug!(error = ?e, "Connect failed: {}", e);
                    ConnectOutcome::Undefined(e.to_string())
                }
            },
            Err(e) => {
                debug!(error = ?e, "Could not create session: {}", e);
                ConnectOutcome::Undefined(e.to_string())
            }
        };
        scope.close().await;
        outcome
    }

    /// Run the full suite
    ///
    /// Connects first and skips everything else when the broker refuses the
    /// connection. An interrupt skips every remaining step.
    pub async fn run_all(&mut self) -> ProbeReport {
        let started_at = Utc::now();
        let connect = self
            .test_connect()
            .instrument(probe_span!(probe = "connect"))
            .await;
        let mut report = ProbeReport::new(started_at, connect);

        if !report.connect.is_success() {
            warn!(outcome = %report.connect, "Skipping remaining probes");
            report.skipped.extend(SuiteStep::ALL);
            report.finished_at = Some(Utc::now());
            return report;
        }

        for step in SuiteStep::ALL {
            if self.is_interrupted() {
                report.interrupted = true;
                report.skipped.push(step);
                continue;
            }
            self.run_step(step, &mut report)
                .instrument(probe_span!(probe = ?step))
                .await;
        }

        report.finished_at = Some(Utc::now());
        info!(
            skipped = report.skipped.len(),
            interrupted = report.interrupted,
            "Probe suite finished"
        );
        report
    }

    async fn run_step(&mut self, step: SuiteStep, report: &mut ProbeReport) {
        let repetitions = self.settings.qos_repetitions;
        match step {
            SuiteStep::TopicLength => report.topic_length = Some(self.test_topic_length().await),
            SuiteStep::SharedSubscription => {
                report.shared_subscription = Some(self.test_shared_subscription().await)
            }
            SuiteStep::Qos0 => report
                .qos
                .push(self.test_qos(QoS::AtMostOnce, repetitions).await),
            SuiteStep::Qos1 => report
                .qos
                .push(self.test_qos(QoS::AtLeastOnce, repetitions).await),
            SuiteStep::Qos2 => report
                .qos
                .push(self.test_qos(QoS::ExactlyOnce, repetitions).await),
            SuiteStep::Retain => report.retain = Some(self.test_retain().await),
            SuiteStep::Wildcard => report.wildcard = Some(self.test_wildcard_subscriptions().await),
            SuiteStep::PayloadSize => {
                let max = self.settings.max_payload_size;
                report.payload_size = Some(self.test_payload_size(max).await)
            }
            SuiteStep::ClientIdLength => {
                report.client_id_length = Some(self.test_client_id_length().await)
            }
            SuiteStep::IdentifierChars => {
                report.identifier_chars = Some(self.test_identifier_chars().await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockBroker;

    #[test]
    fn test_settings_from_section() {
        let section = ProbeSection {
            timeout_secs: 3,
            qos_repetitions: 4,
            max_payload_size: 5,
            max_topic_length: 6,
            max_client_id_length: 7,
        };
        let settings = ProbeSettings::from(&section);
        assert_eq!(settings.timeout, Duration::from_secs(3));
        assert_eq!(settings.qos_repetitions, 4);
        assert_eq!(settings.max_client_id_length, 7);
    }

    #[test]
    fn test_max_topic_length_round_trip() {
        let mut prober = CapabilityProber::with_timeout(MockBroker::new(), Duration::from_millis(50));
        assert_eq!(prober.max_topic_length(), None);
        prober.set_max_topic_length(Some(8));
        assert_eq!(prober.max_topic_length(), Some(8));
        assert!(prober.topic().len() <= 8);
    }

    #[test]
    fn test_interrupt_handle_is_shared() {
        let prober = CapabilityProber::with_timeout(MockBroker::new(), Duration::from_millis(50));
        let handle = prober.interrupt_handle();
        handle.interrupt();
        assert!(prober.is_interrupted());
        assert!(prober.interrupt().is_interrupted());
    }

    #[test]
    fn test_suite_order() {
        assert_eq!(SuiteStep::ALL.first(), Some(&SuiteStep::TopicLength));
        assert_eq!(SuiteStep::ALL.last(), Some(&SuiteStep::IdentifierChars));
        assert_eq!(
            serde_json::to_value(SuiteStep::ClientIdLength).unwrap(),
            "client_id_length"
        );
    }
}
