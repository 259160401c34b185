//! Pure routing of `rumqttc` events
//!
//! The network loop turns every polled event into an [`EventRoute`] and acts
//! on the route, which keeps the decision logic testable without a broker.

use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use std::collections::HashMap;

/// Routing decisions for polled MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged { session_present: bool },
    /// Message on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Broker closed the connection
    Disconnected,
    /// Our own DISCONNECT went out
    DisconnectSent,
    /// Subscription acknowledged with per-filter return codes
    SubscriptionConfirmed { packet_id: u16, failures: usize },
    /// Keep-alive and acknowledgment traffic
    InfrastructureEvent(String),
    /// Other outgoing packets
    OutgoingEvent,
}

/// Pure routing functions
pub struct MessageHandler;

impl MessageHandler {
    /// Route a polled event
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    failures: suback
                        .return_codes
                        .iter()
                        .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                        .count(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Filters to restore after a (re)connect, in a stable order
    pub fn build_resubscription_list(tracked: &HashMap<String, QoS>) -> Vec<(String, QoS)> {
        let mut topics: Vec<(String, QoS)> = tracked
            .iter()
            .map(|(topic, qos)| (topic.clone(), *qos))
            .collect();
        topics.sort_by(|a, b| a.0.cmp(&b.0));
        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, SubAck};

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: true,
            code: ConnectReturnCode::Success,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged {
                session_present: true
            }
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish::new(
            "solar/panel/p1/data",
            QoS::AtLeastOnce,
            r#"{"temperature": 30}"#,
        )));

        match MessageHandler::route_mqtt_event(&publish) {
            EventRoute::MessageReceived { topic, payload } => {
                assert_eq!(topic, "solar/panel/p1/data");
                assert_eq!(&payload[..], br#"{"temperature": 30}"#);
            }
            other => panic!("Expected MessageReceived route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_disconnects() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::Disconnected
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        );
    }

    #[test]
    fn test_route_suback_failures() {
        let suback = Event::Incoming(Packet::SubAck(SubAck::new(
            7,
            vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Failure,
            ],
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&suback),
            EventRoute::SubscriptionConfirmed {
                packet_id: 7,
                failures: 1
            }
        );
    }

    #[test]
    fn test_route_infrastructure_and_outgoing() {
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::PingResp)),
            EventRoute::InfrastructureEvent(_)
        ));
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        );
    }

    #[test]
    fn test_build_resubscription_list() {
        let tracked = HashMap::from([
            ("solar/panel/#".to_string(), QoS::AtLeastOnce),
            ("solar/alerts/+/message".to_string(), QoS::AtMostOnce),
        ]);
        assert_eq!(
            MessageHandler::build_resubscription_list(&tracked),
            vec![
                ("solar/alerts/+/message".to_string(), QoS::AtMostOnce),
                ("solar/panel/#".to_string(), QoS::AtLeastOnce),
            ]
        );
    }
}
