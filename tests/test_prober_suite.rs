//! Full suite orchestration
//!
//! Tests the step order, early abort on a refused connection, interruption and
//! the serialized report.

use mqtt_probe::probe::{CapabilityProber, ProbeOutcome, ProbeSettings, SuiteStep};
use mqtt_probe::report::{render, OutputFormat};
use mqtt_probe::testing::mocks::{LimitMode, MockBroker, SharedMode};
use std::time::Duration;

fn settings() -> ProbeSettings {
    ProbeSettings {
        timeout: Duration::from_millis(200),
        qos_repetitions: 5,
        max_payload_size: 2048,
        max_topic_length: 256,
        max_client_id_length: 128,
    }
}

#[tokio::test]
async fn test_run_all_against_capable_broker() {
    // Arrange
    let broker = MockBroker::new()
        .with_max_payload(1000, LimitMode::Reject)
        .with_max_topic_length(64)
        .with_max_client_id_length(40);
    let mut prober = CapabilityProber::new(broker.clone(), settings());

    // Act
    let report = prober.run_all().await;

    // Assert
    assert!(report.connect.is_success());
    assert!(report.skipped.is_empty());
    assert!(!report.interrupted);
    assert!(report.finished_at.is_some());

    let topic_length = report.topic_length.as_ref().unwrap();
    assert_eq!(topic_length.largest_success(), Some(64));
    assert_eq!(prober.max_topic_length(), Some(topic_length.boundary));

    assert_eq!(report.shared_subscription, Some(ProbeOutcome::Ok));
    assert_eq!(report.qos.len(), 3);
    assert!(report.qos.iter().all(|result| result.received == 5));
    assert_eq!(report.retain, Some(ProbeOutcome::Ok));
    assert_eq!(
        report.wildcard.as_ref().map(|w| w.multi_level.clone()),
        Some(ProbeOutcome::Ok)
    );
    assert_eq!(
        report.payload_size.as_ref().and_then(|p| p.largest_success()),
        Some(1000)
    );
    assert_eq!(
        report.client_id_length.as_ref().and_then(|c| c.largest_success()),
        Some(40)
    );
    assert!(report.identifier_chars.as_ref().unwrap().all_accepted);
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_run_all_stops_when_connection_refused() {
    let broker = MockBroker::new().offline();
    let mut prober = CapabilityProber::new(broker, settings());

    let report = prober.run_all().await;

    assert!(!report.connect.is_success());
    assert_eq!(report.skipped, SuiteStep::ALL.to_vec());
    assert!(report.topic_length.is_none());
    assert!(report.qos.is_empty());
}

#[tokio::test]
async fn test_run_all_skips_remaining_steps_when_interrupted() {
    // Arrange
    let broker = MockBroker::new();
    let mut prober = CapabilityProber::new(broker, settings());
    prober.interrupt_handle().interrupt();

    // Act
    let report = prober.run_all().await;

    // Assert
    assert!(report.connect.is_success());
    assert!(report.interrupted);
    assert_eq!(report.skipped.len(), SuiteStep::ALL.len());
}

#[tokio::test]
async fn test_failing_step_does_not_abort_suite() {
    let broker = MockBroker::new()
        .with_shared_mode(SharedMode::Unsupported)
        .without_wildcards();
    let mut prober = CapabilityProber::new(broker, settings());

    let report = prober.run_all().await;

    assert_eq!(report.shared_subscription, Some(ProbeOutcome::SubscribeFailed));
    assert_eq!(
        report.wildcard.as_ref().map(|w| w.single_level.clone()),
        Some(ProbeOutcome::SubscribeFailed)
    );
    assert!(report.identifier_chars.is_some());
    assert!(report.skipped.is_empty());
}

#[tokio::test]
async fn test_report_renders_as_json_and_text() {
    let mut prober = CapabilityProber::new(MockBroker::new(), settings());
    let report = prober.run_all().await;

    let json = render(&report, OutputFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["connect"]["Acknowledged"]["code"], "Success");
    assert_eq!(value["qos"][2]["qos"], 2);
    assert_eq!(value["retain"], "Ok");

    let text = render(&report, OutputFormat::Pretty).unwrap();
    assert!(text.starts_with("Connect: Success"));
    assert!(text.contains("Retain: OK"));
    assert!(text.contains("EXACTLY_ONCE: Received 5/5"));
}
