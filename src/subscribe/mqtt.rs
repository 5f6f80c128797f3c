//! MQTT transport backed by `rumqttc`.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use tracing::debug;

use super::{BusMessage, BusTransport, TransportEvent};
use crate::config::BusConfig;
use crate::error::TransportError;

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 16;

/// A `rumqttc` client and its event loop.
///
/// The event loop reconnects on the next `poll` after a failure. Sessions
/// are clean, so the subscriber reissues subscriptions on every
/// [`TransportEvent::Connected`].
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Topics whose SUBSCRIBE has not been written to the socket yet.
    requested: VecDeque<String>,
    /// Topics waiting for a SUBACK, by packet id.
    in_flight: HashMap<u16, String>,
}

impl MqttTransport {
    /// Build a transport from configuration. Nothing is sent until the
    /// first `poll`.
    pub fn new(config: &BusConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        Self {
            client,
            eventloop,
            requested: VecDeque::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Drop subscription bookkeeping from a session that has ended.
    fn forget_subscriptions(&mut self) {
        self.requested.clear();
        self.in_flight.clear();
    }

    fn translate(&mut self, event: Event) -> TransportEvent {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    self.in_flight.clear();
                    TransportEvent::Connected
                } else {
                    TransportEvent::Disconnected(format!("connection refused: {:?}", ack.code))
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                TransportEvent::Message(BusMessage::new(publish.topic, publish.payload.to_vec()))
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let Some(topic) = self.in_flight.remove(&ack.pkid) else {
                    return TransportEvent::Idle;
                };
                let refused = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if refused {
                    TransportEvent::SubscribeRejected { topic }
                } else {
                    TransportEvent::Subscribed { topic }
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                TransportEvent::Disconnected("broker sent DISCONNECT".to_string())
            }
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                if let Some(topic) = self.requested.pop_front() {
                    self.in_flight.insert(pkid, topic);
                }
                TransportEvent::Idle
            }
            _ => TransportEvent::Idle,
        }
    }
}

#[async_trait]
impl BusTransport for MqttTransport {
    async fn poll(&mut self) -> Result<TransportEvent, TransportError> {
        match self.eventloop.poll().await {
            Ok(event) => Ok(self.translate(event)),
            Err(e) => {
                self.forget_subscriptions();
                Err(TransportError::Connection(e.to_string()))
            }
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        self.requested.push_back(topic.to_string());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        // Let the event loop write the DISCONNECT packet.
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(event) => debug!(?event, "Draining bus event loop"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Publish, SubAck};

    fn transport() -> MqttTransport {
        MqttTransport::new(&BusConfig::default())
    }

    #[tokio::test]
    async fn test_connack_success_is_connected() {
        let mut t = transport();
        let event = t.translate(Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        ))));
        assert_eq!(event, TransportEvent::Connected);

        let event = t.translate(Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        ))));
        assert!(matches!(event, TransportEvent::Disconnected(_)));
    }

    #[tokio::test]
    async fn test_publish_becomes_message() {
        let mut t = transport();
        let publish = Publish::new("sensor/sfm3003/raw", QoS::AtLeastOnce, r#"{"seq":1}"#);
        let event = t.translate(Event::Incoming(Packet::Publish(publish)));
        assert_eq!(
            event,
            TransportEvent::Message(BusMessage::new("sensor/sfm3003/raw", r#"{"seq":1}"#))
        );
    }

    #[tokio::test]
    async fn test_suback_matched_to_topic() {
        let mut t = transport();
        t.requested.push_back("sensor/sfm3003/raw".to_string());
        t.requested.push_back("sensor/sfm3003/summary".to_string());

        assert_eq!(t.translate(Event::Outgoing(Outgoing::Subscribe(1))), TransportEvent::Idle);
        assert_eq!(t.translate(Event::Outgoing(Outgoing::Subscribe(2))), TransportEvent::Idle);

        let ok = SubAck::new(2, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert_eq!(
            t.translate(Event::Incoming(Packet::SubAck(ok))),
            TransportEvent::Subscribed {
                topic: "sensor/sfm3003/summary".to_string()
            }
        );

        let refused = SubAck::new(1, vec![SubscribeReasonCode::Failure]);
        assert_eq!(
            t.translate(Event::Incoming(Packet::SubAck(refused))),
            TransportEvent::SubscribeRejected {
                topic: "sensor/sfm3003/raw".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_lost_session_forgets_pending_subscriptions() {
        let mut t = transport();
        t.requested.push_back("sensor/sfm3003/raw".to_string());
        t.requested.push_back("sensor/sfm3003/summary".to_string());
        t.translate(Event::Outgoing(Outgoing::Subscribe(1)));

        t.forget_subscriptions();
        assert!(t.requested.is_empty());
        assert!(t.in_flight.is_empty());

        // A replayed SUBSCRIBE from the old session pairs with nothing.
        t.translate(Event::Outgoing(Outgoing::Subscribe(2)));
        let ok = SubAck::new(2, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert_eq!(t.translate(Event::Incoming(Packet::SubAck(ok))), TransportEvent::Idle);
    }
}
