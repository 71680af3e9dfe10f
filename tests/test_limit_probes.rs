//! Boundary probe behavior against the in-memory broker
//!
//! Payload size, topic length and client identifier length discovery, and the
//! identifier character scan.

use mqtt_probe::probe::{
    CapabilityProber, ConnectOutcome, ProbeOutcome, ProbeSettings, IDENTIFIER_CHARS,
};
use mqtt_probe::testing::mocks::{LimitMode, MockBroker};
use std::time::Duration;

fn prober(broker: &MockBroker, timeout: Duration) -> CapabilityProber<MockBroker> {
    CapabilityProber::with_timeout(broker.clone(), timeout)
}

fn sizes<T>(result: &mqtt_probe::probe::DiscoveryResult<T>) -> Vec<usize> {
    result.trials.iter().map(|trial| trial.size).collect()
}

#[tokio::test]
async fn test_payload_size_scenario() {
    // Arrange: the broker refuses payloads over 512 bytes
    let broker = MockBroker::new().with_max_payload(512, LimitMode::Reject);
    let prober = prober(&broker, Duration::from_millis(200));

    // Act
    let result = prober.test_payload_size(1024).await;

    // Assert
    assert_eq!(result.trials[0].size, 1024);
    assert_eq!(result.trials[0].outcome, ProbeOutcome::PublishFailed);
    assert_eq!(
        sizes(&result),
        vec![1024, 512, 768, 640, 576, 544, 528, 520, 516, 514, 513]
    );
    assert_eq!(result.largest_success(), Some(512));
    assert_eq!(result.boundary, 513);
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_payload_size_accepted_at_maximum() {
    let broker = MockBroker::new();
    let prober = prober(&broker, Duration::from_millis(200));

    let result = prober.test_payload_size(4096).await;

    assert_eq!(result.boundary, 4096);
    assert_eq!(result.trials.len(), 1);
    assert_eq!(result.trials[0].outcome, ProbeOutcome::Ok);
}

#[tokio::test]
async fn test_payload_size_truncating_broker_is_wrong_payload() {
    let broker = MockBroker::new().with_max_payload(100, LimitMode::Truncate);
    let prober = prober(&broker, Duration::from_millis(200));

    let result = prober.test_payload_size(256).await;

    assert_eq!(result.trials[0].outcome, ProbeOutcome::WrongPayload);
    assert_eq!(result.largest_success(), Some(100));
}

#[tokio::test]
async fn test_payload_size_dropping_broker_times_out() {
    let broker = MockBroker::new().with_max_payload(20, LimitMode::Drop);
    let prober = prober(&broker, Duration::from_millis(30));

    let result = prober.test_payload_size(64).await;

    assert_eq!(result.trials[0].outcome, ProbeOutcome::Timeout);
    assert_eq!(result.largest_success(), Some(20));
}

#[tokio::test]
async fn test_payload_size_reconnects_dropped_publisher() {
    // Arrange: oversized publishes close the publisher's connection
    let broker = MockBroker::new().with_max_payload(512, LimitMode::Disconnect);
    let prober = prober(&broker, Duration::from_millis(200));

    // Act
    let result = prober.test_payload_size(1024).await;

    // Assert
    assert_eq!(result.largest_success(), Some(512));
    assert!(result
        .trials
        .iter()
        .filter(|trial| trial.size <= 512)
        .all(|trial| trial.outcome == ProbeOutcome::Ok));
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_payload_size_offline_broker() {
    let broker = MockBroker::new().offline();
    let prober = prober(&broker, Duration::from_millis(50));

    let result = prober.test_payload_size(1024).await;

    assert_eq!(result.boundary, 0);
    assert_eq!(result.trials.len(), 1);
    assert!(matches!(result.trials[0].outcome, ProbeOutcome::Undefined(_)));
}

#[tokio::test]
async fn test_topic_length_bounds_later_topics() {
    // Arrange
    let broker = MockBroker::new().with_max_topic_length(100);
    let settings = ProbeSettings {
        max_topic_length: 1024,
        ..ProbeSettings::with_timeout(Duration::from_millis(200))
    };
    let mut prober = CapabilityProber::new(broker.clone(), settings);

    // Act
    let result = prober.test_topic_length().await;

    // Assert
    assert_eq!(result.largest_success(), Some(100));
    assert!(result.boundary == 100 || result.boundary == 101);
    assert_eq!(prober.max_topic_length(), Some(result.boundary));
}

#[tokio::test]
async fn test_topic_length_keeps_seed_when_publisher_cannot_connect() {
    let broker = MockBroker::new().offline();
    let mut prober = prober(&broker, Duration::from_millis(50));
    prober.set_max_topic_length(Some(12));

    prober.test_topic_length().await;

    assert_eq!(prober.max_topic_length(), Some(12));
}

#[tokio::test]
async fn test_topic_length_keeps_seed_when_interrupted() {
    // Arrange
    let broker = MockBroker::new().with_max_topic_length(100);
    let mut prober = prober(&broker, Duration::from_millis(200));
    prober.set_max_topic_length(Some(48));
    prober.interrupt_handle().interrupt();

    // Act
    let result = prober.test_topic_length().await;

    // Assert
    assert!(result
        .trials
        .iter()
        .all(|trial| trial.outcome == ProbeOutcome::Interrupted));
    assert_eq!(prober.max_topic_length(), Some(48));
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_client_id_length() {
    // Arrange
    let broker = MockBroker::new().with_max_client_id_length(23);
    let prober = prober(&broker, Duration::from_millis(200));

    // Act
    let result = prober.test_client_id_length().await;

    // Assert
    assert_eq!(result.largest_success(), Some(23));
    assert!(result.boundary == 23 || result.boundary == 24);
    let refused = &result.trials[0].outcome;
    assert_eq!(
        refused.code().map(|code| code.as_str()),
        Some("ClientIdentifierNotValid")
    );
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_identifier_chars_all_accepted() {
    let broker = MockBroker::new();

    let result = prober(&broker, Duration::from_millis(200))
        .test_identifier_chars()
        .await;

    assert!(result.all_accepted);
    assert!(result.characters.is_empty());
    assert_eq!(broker.connect_log(), vec![IDENTIFIER_CHARS.to_string()]);
}

#[tokio::test]
async fn test_identifier_chars_scenario() {
    // Arrange
    let broker = MockBroker::new().rejecting_chars("@", "ClientIdentifierNotValid");

    // Act
    let result = prober(&broker, Duration::from_millis(200))
        .test_identifier_chars()
        .await;

    // Assert
    assert!(!result.all_accepted);
    assert_eq!(result.characters.len(), IDENTIFIER_CHARS.chars().count());

    let at = result
        .characters
        .iter()
        .find(|entry| entry.character == '@')
        .unwrap();
    assert_eq!(
        at.outcome.code().map(|code| code.as_str()),
        Some("ClientIdentifierNotValid")
    );

    for entry in result.characters.iter().filter(|entry| entry.character != '@') {
        match entry.character {
            // A lone space cannot be sent as an identifier
            ' ' => assert!(matches!(entry.outcome, ConnectOutcome::Undefined(_))),
            _ => assert!(entry.outcome.is_success(), "{:?}", entry.character),
        }
    }
}
