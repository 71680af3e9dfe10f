//! Feature probe behavior against the in-memory broker
//!
//! Covers connectivity, shared subscriptions, QoS delivery, retained messages
//! and wildcard subscriptions, including the broker variants each probe is
//! meant to tell apart.

use mqtt_probe::probe::{CapabilityProber, ConnectOutcome, ProbeOutcome};
use mqtt_probe::testing::mocks::{MockBroker, SharedMode};
use mqtt_probe::transport::QoS;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(200);

fn prober(broker: &MockBroker) -> CapabilityProber<MockBroker> {
    CapabilityProber::with_timeout(broker.clone(), TIMEOUT)
}

#[tokio::test]
async fn test_connect_to_online_broker() {
    // Arrange
    let broker = MockBroker::new();
    let prober = prober(&broker);

    // Act
    let outcome = prober.test_connect().await;

    // Assert
    assert!(outcome.is_success());
    assert_eq!(outcome.code().map(|code| code.as_str()), Some("Success"));
    assert_eq!(broker.connect_log().len(), 1);
    assert_eq!(broker.disconnects(), 1, "session was connected until the probe closed it");
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_connect_to_offline_broker_is_undefined() {
    let broker = MockBroker::new().offline();

    let outcome = prober(&broker).test_connect().await;

    assert!(matches!(outcome, ConnectOutcome::Undefined(_)));
    assert!(outcome.code().is_none());
}

#[tokio::test]
async fn test_connect_refusal_keeps_reason_code() {
    // Arrange: generated identifiers are hex, so refuse a hex digit
    let broker = MockBroker::new().rejecting_chars("0123456789abcdef", "NotAuthorized");

    // Act
    let outcome = prober(&broker).test_connect().await;

    // Assert
    assert!(!outcome.is_success());
    assert_eq!(outcome.code().map(|code| code.as_str()), Some("NotAuthorized"));
}

// The shared probe decides after a grace sleep, so a very slow runner can
// misreport fan-out as shared.
#[tokio::test]
async fn test_shared_subscription_supported() {
    let broker = MockBroker::new();

    let outcome = prober(&broker).test_shared_subscription().await;

    assert_eq!(outcome, ProbeOutcome::Ok);
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_shared_subscription_fan_out_is_not_shared() {
    let broker = MockBroker::new().with_shared_mode(SharedMode::FanOut);

    let outcome = prober(&broker).test_shared_subscription().await;

    assert_eq!(outcome, ProbeOutcome::NotShared);
}

#[tokio::test]
async fn test_shared_subscription_unsupported() {
    let broker = MockBroker::new().with_shared_mode(SharedMode::Unsupported);

    let outcome = prober(&broker).test_shared_subscription().await;

    assert_eq!(outcome, ProbeOutcome::SubscribeFailed);
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_shared_subscription_publish_refused() {
    // Arrange: subscriptions succeed, the single publish is refused
    let broker = MockBroker::new().refusing_publishes("NotAuthorized");

    // Act
    let outcome = prober(&broker).test_shared_subscription().await;

    // Assert
    assert_eq!(outcome, ProbeOutcome::PublishFailed);
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_qos_levels_deliver_every_publish() {
    let broker = MockBroker::new();
    let prober = prober(&broker);

    for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
        let result = prober.test_qos(qos, 10).await;

        assert_eq!(result.outcome, ProbeOutcome::Ok, "QoS {qos:?}");
        assert_eq!(result.received, 10);
        assert_eq!(result.repetitions, 10);
        assert_eq!(result.qos, qos);
    }
}

#[tokio::test]
async fn test_qos_downgraded_deliveries_do_not_count() {
    // Arrange
    let broker = MockBroker::new().with_max_qos(QoS::AtMostOnce);
    let prober = prober(&broker);

    // Act
    let result = prober.test_qos(QoS::AtLeastOnce, 5).await;

    // Assert
    assert_eq!(result.outcome, ProbeOutcome::Timeout);
    assert_eq!(result.received, 0);
    assert!(result.elapsed >= TIMEOUT);
}

#[tokio::test]
async fn test_qos_received_never_exceeds_repetitions() {
    // Arrange: every publish reaches the subscriber twice
    let broker = MockBroker::new().duplicating_deliveries();
    let prober = prober(&broker);

    // Act
    let result = prober.test_qos(QoS::AtLeastOnce, 4).await;

    // Assert
    assert_eq!(result.outcome, ProbeOutcome::Ok);
    assert_eq!(result.received, 4);
    assert!(result.received <= result.repetitions);
}

#[tokio::test]
async fn test_qos_subscribe_refused() {
    let broker = MockBroker::new().refusing_subscriptions("NotAuthorized");

    let result = prober(&broker).test_qos(QoS::ExactlyOnce, 3).await;

    assert_eq!(result.outcome, ProbeOutcome::SubscribeFailed);
    assert_eq!(result.received, 0);
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_qos_offline_broker_is_undefined() {
    let broker = MockBroker::new().offline();

    let result = prober(&broker).test_qos(QoS::AtLeastOnce, 3).await;

    assert!(matches!(result.outcome, ProbeOutcome::Undefined(_)));
    assert_eq!(result.received, 0);
}

#[tokio::test]
async fn test_retain_supported_and_cleared() {
    let broker = MockBroker::new();

    let outcome = prober(&broker).test_retain().await;

    assert_eq!(outcome, ProbeOutcome::Ok);
    assert!(broker.retained_topics().is_empty());
}

#[tokio::test]
async fn test_retain_unsupported_times_out() {
    let broker = MockBroker::new().without_retain();

    let outcome = prober(&broker).test_retain().await;

    assert_eq!(outcome, ProbeOutcome::Timeout);
}

#[tokio::test]
async fn test_retain_publish_refused() {
    let broker = MockBroker::new().refusing_publishes("NotAuthorized");

    let outcome = prober(&broker).test_retain().await;

    assert_eq!(outcome, ProbeOutcome::PublishFailed);
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_retain_subscribe_refused() {
    // Arrange
    let broker = MockBroker::new().refusing_subscriptions("NotAuthorized");

    // Act
    let outcome = prober(&broker).test_retain().await;

    // Assert
    assert_eq!(outcome, ProbeOutcome::SubscribeFailed);
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_retain_respects_interrupt() {
    // Arrange
    let broker = MockBroker::new().without_retain();
    let prober = CapabilityProber::with_timeout(broker.clone(), Duration::from_secs(30));
    prober.interrupt_handle().interrupt();

    // Act
    let outcome = tokio::time::timeout(Duration::from_secs(5), prober.test_retain())
        .await
        .expect("interrupt should end the wait");

    // Assert
    assert_eq!(outcome, ProbeOutcome::Interrupted);
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_wildcards_supported() {
    let broker = MockBroker::new();

    let result = prober(&broker).test_wildcard_subscriptions().await;

    assert_eq!(result.single_level, ProbeOutcome::Ok);
    assert_eq!(result.multi_level, ProbeOutcome::Ok);
}

#[tokio::test]
async fn test_wildcards_unsupported() {
    let broker = MockBroker::new().without_wildcards();

    let result = prober(&broker).test_wildcard_subscriptions().await;

    assert_eq!(result.single_level, ProbeOutcome::SubscribeFailed);
    assert_eq!(result.multi_level, ProbeOutcome::SubscribeFailed);
}

#[tokio::test]
async fn test_single_level_wildcard_does_not_match_two_levels() {
    let broker = MockBroker::new();

    let outcome = prober(&broker).test_wildcard("+", "a/b").await;

    assert_eq!(outcome, ProbeOutcome::Timeout);
}
