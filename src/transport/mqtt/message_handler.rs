//! Pure routing of rumqttc events for probe sessions
//!
//! The event loop task turns every [`Event`] into an [`EventRoute`] here and
//! then acts on it. Nothing in this module does I/O.

use crate::topics::topic_matches;
use crate::transport::{ConnectAck, Delivery, MessageCallback, ReasonCode};
use rumqttc::v5::mqttbytes::v5::{
    Packet, PubAckReason, PubCompReason, PubRecReason, SubscribeReasonCode,
};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to the action the session should take
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged(ConnectAck {
                    code: ReasonCode::from_debug(&connack.code),
                    session_present: connack.session_present,
                }),
                Packet::Publish(publish) => EventRoute::MessageReceived(Delivery {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: publish.payload.clone(),
                    qos: publish.qos,
                    retain: publish.retain,
                }),
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
                }
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    pkid: suback.pkid,
                    failure: suback
                        .return_codes
                        .iter()
                        .find(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                        .map(ReasonCode::from_debug),
                },
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    pkid: puback.pkid,
                    failure: match puback.reason {
                        PubAckReason::Success | PubAckReason::NoMatchingSubscribers => None,
                        ref other => Some(ReasonCode::from_debug(other)),
                    },
                },
                // A failed PUBREC ends the QoS 2 flow early
                Packet::PubRec(pubrec) => match pubrec.reason {
                    PubRecReason::Success | PubRecReason::NoMatchingSubscribers => {
                        EventRoute::InfrastructureEvent(format!("PubRec({})", pubrec.pkid))
                    }
                    ref other => EventRoute::PublishAcknowledged {
                        pkid: pubrec.pkid,
                        failure: Some(ReasonCode::from_debug(other)),
                    },
                },
                Packet::PubComp(pubcomp) => EventRoute::PublishAcknowledged {
                    pkid: pubcomp.pkid,
                    failure: match pubcomp.reason {
                        PubCompReason::Success => None,
                        ref other => Some(ReasonCode::from_debug(other)),
                    },
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent { pkid: *pkid },
            Event::Outgoing(Outgoing::Subscribe(pkid)) => EventRoute::SubscribeSent { pkid: *pkid },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Invoke every callback whose filter matches the delivery's topic
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(subscriptions: &[(String, MessageCallback)], delivery: &Delivery) -> usize {
        let mut invoked = 0;
        for (filter, callback) in subscriptions {
            if topic_matches(filter, &delivery.topic) {
                callback(delivery);
                invoked += 1;
            }
        }
        invoked
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// CONNACK, with whatever code the broker sent
    ConnectionAcknowledged(ConnectAck),
    /// Message delivered to one of our subscriptions
    MessageReceived(Delivery),
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// SUBACK; `failure` holds the first non-success code
    SubscriptionAcknowledged {
        pkid: u16,
        failure: Option<ReasonCode>,
    },
    /// Final acknowledgement of a QoS 1/2 publish; `failure` holds a rejection
    PublishAcknowledged {
        pkid: u16,
        failure: Option<ReasonCode>,
    },
    /// PUBLISH written to the network with its packet id (0 for QoS 0)
    PublishSent { pkid: u16 },
    /// SUBSCRIBE written to the network with its packet id
    SubscribeSent { pkid: u16 },
    /// Infrastructure event (PingResp, PubRec, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
