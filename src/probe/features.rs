//! Feature probes: connectivity, shared subscriptions, QoS delivery,
//! retained messages and wildcard filters
//!
//! Every probe opens its sessions through a [`SessionScope`] and closes the
//! scope before returning, whatever the outcome. Broker rejections become
//! outcomes; unexpected faults are logged and reduced to `Undefined`.

use super::outcome::{qos_label, ConnectOutcome, ProbeOutcome, QosProbeResult, WildcardProbeResult};
use super::prober::CapabilityProber;
use super::signal::{interruptible_sleep, Latch, WaitOutcome};
use crate::topics::{random_group, shared_filter};
use crate::transport::{
    BrokerSession, Delivery, MessageCallback, QoS, SessionError, SessionFactory, SessionScope,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Extra wait after the first shared delivery, on top of the time it took
const SHARED_GRACE: Duration = Duration::from_millis(100);

const SHARED_PAYLOAD: &[u8] = b"test";
const RETAIN_PAYLOAD: &[u8] = b"RETAIN";
const WILDCARD_PAYLOAD: &[u8] = b"WILDCARD_TEST";

impl<F: SessionFactory> CapabilityProber<F> {
    /// Connect once and return the broker's acknowledgement verbatim
    #[tracing::instrument(name = "connect_probe", skip_all)]
    pub async fn test_connect(&self) -> ConnectOutcome {
        let outcome = self.connect_outcome(None).await;
        match &outcome {
            ConnectOutcome::Acknowledged(ack) if ack.code.is_success() => {
                info!("Connected to broker")
            }
            ConnectOutcome::Acknowledged(ack) => {
                warn!(code = %ack.code, "Broker refused the connection")
            }
            ConnectOutcome::Undefined(reason) => {
                error!("Could not connect MQTT5 client: {}", reason)
            }
        }
        outcome
    }

    /// Two subscribers share one filter; a single publish must reach exactly one
    ///
    /// After the first delivery the probe waits another `100 ms` plus the time
    /// the first delivery took. A second delivery in that window means the
    /// broker fanned the message out (`NotShared`). Slow brokers can deliver
    /// the duplicate later than that and pass.
    #[tracing::instrument(name = "shared_subscription_probe", skip_all)]
    pub async fn test_shared_subscription(&self) -> ProbeOutcome {
        let mut scope = SessionScope::new(&self.factory);
        let outcome = match self.shared_subscription(&mut scope).await {
            Ok(outcome) => outcome,
            Err(e) => self.unexpected("Shared subscription probe failed", e),
        };
        scope.close().await;
        info!(outcome = %outcome, "Shared subscription probe finished");
        outcome
    }

    async fn shared_subscription(
        &self,
        scope: &mut SessionScope<'_, F>,
    ) -> Result<ProbeOutcome, SessionError> {
        let topic = self.topic();
        let filter = shared_filter(&random_group(), &topic);

        let publisher = scope.connect(None).await?;
        let first_subscriber = scope.connect(None).await?;
        let second_subscriber = scope.connect(None).await?;

        let latch = Latch::new(1);
        for subscriber in [&first_subscriber, &second_subscriber] {
            let counter = latch.clone();
            let on_message: MessageCallback = Arc::new(move |_: &Delivery| {
                if !counter.signal() {
                    debug!("Duplicate shared delivery");
                }
            });
            if let Err(e) = subscriber.subscribe(&filter, QoS::AtLeastOnce, on_message).await {
                return Ok(self.rejected(
                    &format!("Could not subscribe to {filter}"),
                    e,
                    ProbeOutcome::SubscribeFailed,
                ));
            }
        }

        if let Err(e) = publisher
            .publish(&topic, Bytes::from_static(SHARED_PAYLOAD), QoS::AtLeastOnce, false)
            .await
        {
            error!(error = ?e, "Could not publish to topic {}: {}", topic, e);
            return Ok(ProbeOutcome::PublishFailed);
        }
        let start = Instant::now();

        let mut interrupt = self.interrupt();
        match latch.wait_up_to(self.settings.timeout, &mut interrupt).await {
            WaitOutcome::Fired => {}
            other => return Ok(ProbeOutcome::from(other)),
        }
        let time_to_receive = start.elapsed();

        if !interruptible_sleep(&mut interrupt, SHARED_GRACE + time_to_receive).await {
            return Ok(ProbeOutcome::Interrupted);
        }

        if latch.extra_signals() > 0 {
            Ok(ProbeOutcome::NotShared)
        } else {
            Ok(ProbeOutcome::Ok)
        }
    }

    /// Publish `repetitions` messages at `qos` without waiting for
    /// acknowledgements and count how many arrive with that QoS and payload
    #[tracing::instrument(name = "qos_probe", skip(self, qos), fields(qos = qos_label(qos)))]
    pub async fn test_qos(&self, qos: QoS, repetitions: u32) -> QosProbeResult {
        let mut scope = SessionScope::new(&self.factory);
        let result = match self.qos_delivery(&mut scope, qos, repetitions).await {
            Ok(result) => result,
            Err(e) => QosProbeResult {
                qos,
                repetitions,
                received: 0,
                elapsed: Duration::ZERO,
                outcome: self.unexpected("QoS probe failed", e),
            },
        };
        scope.close().await;
        info!(
            received = result.received,
            repetitions,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "QoS probe finished"
        );
        result
    }

    async fn qos_delivery(
        &self,
        scope: &mut SessionScope<'_, F>,
        qos: QoS,
        repetitions: u32,
    ) -> Result<QosProbeResult, SessionError> {
        let topic = self.topic();
        let payload = Bytes::from_static(qos_label(qos).as_bytes());

        let subscriber = scope.connect(None).await?;
        let publisher = scope.connect(None).await?;

        let latch = Latch::new(repetitions as usize);
        let received = Arc::new(AtomicU32::new(0));
        let on_message: MessageCallback = {
            let latch = latch.clone();
            let received = received.clone();
            let expected = payload.clone();
            Arc::new(move |delivery: &Delivery| {
                if delivery.qos == qos && delivery.payload == expected && latch.signal() {
                    received.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        if let Err(e) = subscriber.subscribe(&topic, qos, on_message).await {
            return Ok(QosProbeResult {
                qos,
                repetitions,
                received: 0,
                elapsed: Duration::ZERO,
                outcome: self.rejected(
                    &format!("Could not subscribe with QoS {}", qos_label(qos)),
                    e,
                    ProbeOutcome::SubscribeFailed,
                ),
            });
        }

        let start = Instant::now();
        for _ in 0..repetitions {
            if let Err(e) = publisher
                .enqueue_publish(&topic, payload.clone(), qos, false)
                .await
            {
                error!(error = ?e, "Could not publish with QoS {}: {}", qos_label(qos), e);
            }
        }

        let wait = latch
            .wait_up_to(self.settings.timeout, &mut self.interrupt())
            .await;
        let elapsed = start.elapsed();

        Ok(QosProbeResult {
            qos,
            repetitions,
            received: received.load(Ordering::SeqCst),
            elapsed,
            outcome: ProbeOutcome::from(wait),
        })
    }

    /// Publish a retained message, then subscribe and wait for it
    ///
    /// The retained message is cleared afterwards with an empty retained publish.
    #[tracing::instrument(name = "retain_probe", skip_all)]
    pub async fn test_retain(&self) -> ProbeOutcome {
        let mut scope = SessionScope::new(&self.factory);
        let outcome = match self.retain(&mut scope).await {
            Ok(outcome) => outcome,
            Err(e) => self.unexpected("Retain probe failed", e),
        };
        scope.close().await;
        info!(outcome = %outcome, "Retain probe finished");
        outcome
    }

    async fn retain(&self, scope: &mut SessionScope<'_, F>) -> Result<ProbeOutcome, SessionError> {
        let topic = self.topic();

        let publisher = scope.connect(None).await?;
        if let Err(e) = publisher
            .publish(&topic, Bytes::from_static(RETAIN_PAYLOAD), QoS::AtLeastOnce, true)
            .await
        {
            return Ok(self.rejected("Retained publish failed", e, ProbeOutcome::PublishFailed));
        }

        let subscriber = scope.connect(None).await?;
        let latch = Latch::new(1);
        let on_message: MessageCallback = {
            let latch = latch.clone();
            Arc::new(move |delivery: &Delivery| {
                if delivery.retain {
                    latch.signal();
                }
            })
        };

        if let Err(e) = subscriber.subscribe(&topic, QoS::AtLeastOnce, on_message).await {
            return Ok(self.rejected("Retained subscribe failed", e, ProbeOutcome::SubscribeFailed));
        }

        let wait = latch
            .wait_up_to(self.settings.timeout, &mut self.interrupt())
            .await;

        if let Err(e) = publisher
            .publish(&topic, Bytes::new(), QoS::AtLeastOnce, true)
            .await
        {
            debug!(error = ?e, "Could not clear retained message on {}", topic);
        }

        Ok(ProbeOutcome::from(wait))
    }

    /// Single-level (`+`) and multi-level (`#`) wildcard subscriptions
    pub async fn test_wildcard_subscriptions(&self) -> WildcardProbeResult {
        let single_level = self.test_wildcard("+", "test").await;
        let multi_level = self.test_wildcard("#", "test/subtopic").await;
        WildcardProbeResult {
            single_level,
            multi_level,
        }
    }

    /// Subscribe to `<random>/<pattern>`, publish to `<random>/<suffix>` and
    /// wait for the exact payload
    #[tracing::instrument(name = "wildcard_probe", skip(self))]
    pub async fn test_wildcard(&self, pattern: &str, suffix: &str) -> ProbeOutcome {
        let mut scope = SessionScope::new(&self.factory);
        let outcome = match self.wildcard(&mut scope, pattern, suffix).await {
            Ok(outcome) => outcome,
            Err(e) => self.unexpected("Wildcard probe failed", e),
        };
        scope.close().await;
        info!(outcome = %outcome, "Wildcard probe finished");
        outcome
    }

    async fn wildcard(
        &self,
        scope: &mut SessionScope<'_, F>,
        pattern: &str,
        suffix: &str,
    ) -> Result<ProbeOutcome, SessionError> {
        let topic = self.topic();
        let filter = format!("{topic}/{pattern}");
        let publish_topic = format!("{topic}/{suffix}");

        let subscriber = scope.connect(None).await?;
        let publisher = scope.connect(None).await?;

        let latch = Latch::new(1);
        let on_message: MessageCallback = {
            let latch = latch.clone();
            Arc::new(move |delivery: &Delivery| {
                if delivery.payload.as_ref() == WILDCARD_PAYLOAD {
                    latch.signal();
                }
            })
        };

        if let Err(e) = subscriber.subscribe(&filter, QoS::AtLeastOnce, on_message).await {
            return Ok(self.rejected(
                &format!("Subscribe to wildcard topic '{filter}' failed"),
                e,
                ProbeOutcome::SubscribeFailed,
            ));
        }

        if let Err(e) = publisher
            .publish(
                &publish_topic,
                Bytes::from_static(WILDCARD_PAYLOAD),
                QoS::AtLeastOnce,
                false,
            )
            .await
        {
            return Ok(self.rejected(
                &format!("Publish to topic '{publish_topic}' failed"),
                e,
                ProbeOutcome::PublishFailed,
            ));
        }

        let wait = latch
            .wait_up_to(self.settings.timeout, &mut self.interrupt())
            .await;
        Ok(ProbeOutcome::from(wait))
    }
}
