//! Boundary probes: payload size, topic length, client identifier length and
//! identifier characters

use super::boundary::{BoundarySearch, SizeTrial};
use super::outcome::{
    CharProbeResult, ConnectOutcome, DiscoveryResult, IdentifierCharsResult, ProbeOutcome,
    SizedProbeResult,
};
use super::prober::CapabilityProber;
use super::signal::{Latch, WaitOutcome};
use crate::topics::filled;
use crate::trial_span;
use crate::transport::{
    disconnect_if_connected, BrokerSession, Delivery, MessageCallback, QoS, SessionError,
    SessionFactory, SessionScope,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn, Instrument};

/// Printable punctuation tried in client identifiers
///
/// Space comes last because a leading space is refused before any packet is sent.
pub const IDENTIFIER_CHARS: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~ ";

/// What a delivery trial sends at a given size
enum TrialMessage {
    /// Filler payload of the given size on a fixed topic
    Payload { topic: String },
    /// Filler topic of the given length carrying itself as payload
    Topic,
}

impl TrialMessage {
    fn build(&self, size: usize) -> (String, Bytes) {
        match self {
            TrialMessage::Payload { topic } => (topic.clone(), Bytes::from(filled(size))),
            TrialMessage::Topic => {
                let topic = filled(size);
                let payload = Bytes::from(topic.clone());
                (topic, payload)
            }
        }
    }
}

/// Round-trip trial: subscribe, publish from the long-lived publisher and
/// compare what arrives
struct DeliveryTrial<'p, F: SessionFactory> {
    prober: &'p CapabilityProber<F>,
    publisher: Arc<F::Session>,
    message: TrialMessage,
}

impl<'p, F: SessionFactory> DeliveryTrial<'p, F> {
    async fn deliver(
        &self,
        scope: &mut SessionScope<'_, F>,
        topic: &str,
        payload: Bytes,
    ) -> Result<ProbeOutcome, SessionError> {
        let subscriber = scope.connect(None).await?;

        let latch = Latch::new(1);
        let received: Arc<Mutex<Option<Bytes>>> = Arc::new(Mutex::new(None));
        let on_message: MessageCallback = {
            let latch = latch.clone();
            let received = received.clone();
            Arc::new(move |delivery: &Delivery| {
                if let Ok(mut slot) = received.lock() {
                    if slot.is_none() {
                        *slot = Some(delivery.payload.clone());
                    }
                }
                latch.signal();
            })
        };

        if let Err(e) = subscriber.subscribe(topic, QoS::AtLeastOnce, on_message).await {
            return Ok(self
                .prober
                .rejected("Subscribe failed", e, ProbeOutcome::SubscribeFailed));
        }

        if !self.publisher.is_connected() {
            debug!("Reconnecting publisher");
            match self.publisher.connect().await {
                Ok(ack) if ack.code.is_success() => {}
                Ok(ack) => {
                    warn!(code = %ack.code, "Publisher reconnect refused");
                    return Ok(ProbeOutcome::PublishFailed);
                }
                Err(e) => {
                    return Ok(self
                        .prober
                        .rejected("Publisher reconnect failed", e, ProbeOutcome::PublishFailed))
                }
            }
        }

        if let Err(e) = self
            .publisher
            .publish(topic, payload.clone(), QoS::AtLeastOnce, false)
            .await
        {
            return Ok(self
                .prober
                .rejected("Publish failed", e, ProbeOutcome::PublishFailed));
        }

        let wait = latch
            .wait_up_to(self.prober.settings.timeout, &mut self.prober.interrupt())
            .await;
        if wait != WaitOutcome::Fired {
            return Ok(ProbeOutcome::from(wait));
        }

        let arrived = received.lock().ok().and_then(|slot| slot.clone());
        if arrived.as_ref() == Some(&payload) {
            Ok(ProbeOutcome::Ok)
        } else {
            Ok(ProbeOutcome::WrongPayload)
        }
    }
}

#[async_trait]
impl<'p, F: SessionFactory> SizeTrial for DeliveryTrial<'p, F> {
    type Outcome = ProbeOutcome;

    async fn attempt(&mut self, size: usize) -> ProbeOutcome {
        if self.prober.is_interrupted() {
            return ProbeOutcome::Interrupted;
        }

        let (topic, payload) = self.message.build(size);
        async {
            let mut scope = SessionScope::new(&self.prober.factory);
            let outcome = match self.deliver(&mut scope, &topic, payload).await {
                Ok(outcome) => outcome,
                Err(e) => self.prober.unexpected("Boundary trial failed", e),
            };
            scope.close().await;
            outcome
        }
        .instrument(trial_span!(size))
        .await
    }
}

/// Connect-only trial with a filler client identifier
struct ClientIdTrial<'p, F: SessionFactory> {
    prober: &'p CapabilityProber<F>,
}

#[async_trait]
impl<'p, F: SessionFactory> SizeTrial for ClientIdTrial<'p, F> {
    type Outcome = ConnectOutcome;

    async fn attempt(&mut self, size: usize) -> ConnectOutcome {
        if self.prober.is_interrupted() {
            return ConnectOutcome::Undefined("Interrupted".to_string());
        }

        let client_id = filled(size);
        self.prober
            .connect_outcome(Some(&client_id))
            .instrument(trial_span!(size))
            .await
    }
}

impl<F: SessionFactory> CapabilityProber<F> {
    /// Discover the largest payload the broker delivers, starting at `max_size`
    #[tracing::instrument(name = "payload_size_probe", skip(self))]
    pub async fn test_payload_size(&self, max_size: usize) -> DiscoveryResult<ProbeOutcome> {
        let topic = self.topic();
        let result = self
            .delivery_search(TrialMessage::Payload { topic }, max_size, |_| {})
            .await;
        info!(
            boundary = result.boundary,
            largest_success = ?result.largest_success(),
            "Payload size probe finished"
        );
        result
    }

    /// Discover the longest topic the broker accepts and remember it as the
    /// safe topic length for later probes
    #[tracing::instrument(name = "topic_length_probe", skip_all)]
    pub async fn test_topic_length(&mut self) -> DiscoveryResult<ProbeOutcome> {
        let max_length = self.settings.max_topic_length;
        let mut found = None;
        let result = self
            .delivery_search(TrialMessage::Topic, max_length, |boundary| found = Some(boundary))
            .await;
        // Interrupted trials read as failures and drag the bisection toward 0
        let interrupted = self.is_interrupted()
            || result
                .trials
                .iter()
                .any(|trial| trial.outcome == ProbeOutcome::Interrupted);
        match found {
            Some(_) if interrupted => {
                warn!("Topic length probe interrupted, keeping the safe topic length");
            }
            Some(boundary) => self.set_max_topic_length(Some(boundary)),
            None => {}
        }
        info!(
            boundary = result.boundary,
            largest_success = ?result.largest_success(),
            "Topic length probe finished"
        );
        result
    }

    /// Discover the longest client identifier the broker accepts
    #[tracing::instrument(name = "client_id_length_probe", skip_all)]
    pub async fn test_client_id_length(&self) -> DiscoveryResult<ConnectOutcome> {
        let mut trial = ClientIdTrial { prober: self };
        let result = BoundarySearch::new(self.settings.max_client_id_length)
            .run(&mut trial)
            .await;
        info!(
            boundary = result.boundary,
            largest_success = ?result.largest_success(),
            "Client identifier length probe finished"
        );
        result
    }

    /// Find which punctuation characters the broker accepts in client identifiers
    ///
    /// One connect with the whole set decides the common case. Only when that
    /// is refused is every character tried alone.
    #[tracing::instrument(name = "identifier_chars_probe", skip_all)]
    pub async fn test_identifier_chars(&self) -> IdentifierCharsResult {
        let all = self.connect_outcome(Some(IDENTIFIER_CHARS)).await;
        if all.is_success() {
            info!("Every identifier character accepted");
            return IdentifierCharsResult {
                all_accepted: true,
                characters: Vec::new(),
            };
        }
        info!(outcome = %all, "Identifier characters refused as a set, trying each alone");

        let mut characters = Vec::with_capacity(IDENTIFIER_CHARS.len());
        for character in IDENTIFIER_CHARS.chars() {
            if self.is_interrupted() {
                warn!("Identifier character scan interrupted");
                break;
            }
            let client_id = character.to_string();
            let outcome = self.connect_outcome(Some(&client_id)).await;
            debug!(%character, outcome = %outcome, "Identifier character");
            characters.push(CharProbeResult { character, outcome });
        }

        IdentifierCharsResult {
            all_accepted: false,
            characters,
        }
    }

    /// Run a delivery boundary search with one publisher kept across trials
    async fn delivery_search<C: FnOnce(usize)>(
        &self,
        message: TrialMessage,
        max_candidate: usize,
        on_boundary_found: C,
    ) -> DiscoveryResult<ProbeOutcome> {
        let publisher = match self.connected_publisher().await {
            Ok(publisher) => Arc::new(publisher),
            Err(e) => {
                return DiscoveryResult {
                    boundary: 0,
                    trials: vec![SizedProbeResult {
                        size: max_candidate,
                        outcome: self.unexpected("Could not connect publisher", e),
                    }],
                }
            }
        };

        let mut trial = DeliveryTrial {
            prober: self,
            publisher: publisher.clone(),
            message,
        };
        let result = BoundarySearch::new(max_candidate)
            .run_with(&mut trial, on_boundary_found)
            .await;

        disconnect_if_connected(publisher.as_ref()).await;
        result
    }

    async fn connected_publisher(&self) -> Result<F::Session, SessionError> {
        let publisher = self.factory.create_session(None)?;
        let ack = publisher.connect().await?;
        if !ack.code.is_success() {
            return Err(SessionError::ConnectRejected(ack.code));
        }
        Ok(publisher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_chars_are_printable_punctuation() {
        assert!(IDENTIFIER_CHARS
            .chars()
            .all(|c| c.is_ascii_punctuation() || c == ' '));
        assert!(IDENTIFIER_CHARS.ends_with(' '));
        assert!(!IDENTIFIER_CHARS.starts_with(' '));
        assert_eq!(IDENTIFIER_CHARS.len(), 33);
    }

    #[test]
    fn test_sized_messages() {
        let (topic, payload) = TrialMessage::Payload {
            topic: "t".to_string(),
        }
        .build(4);
        assert_eq!(topic, "t");
        assert_eq!(payload, Bytes::from_static(b"aaaa"));

        let (topic, payload) = TrialMessage::Topic.build(3);
        assert_eq!(topic, "aaa");
        assert_eq!(payload, Bytes::from_static(b"aaa"));
    }
}
