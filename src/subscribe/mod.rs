//! Bus subscription.
//!
//! ```text
//! ┌──────────────┐  poll()   ┌───────────────┐  BusMessage  ┌────────────┐
//! │ BusTransport │──────────▶│ BusSubscriber │─────────────▶│ Dispatcher │
//! │ (MQTT)       │◀──────────│ (reconnects)  │    mpsc      └────────────┘
//! └──────────────┘ subscribe └───────┬───────┘
//!                                    │ watch
//!                                    ▼
//!                             ConnectionStatus
//! ```
//!
//! The transport is a trait so the subscriber loop can be driven by a
//! scripted double in tests. [`MqttTransport`] is the production
//! implementation.

mod mqtt;
mod subscriber;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::TransportError;

pub use mqtt::MqttTransport;
pub use subscriber::{Backoff, BusSubscriber};

/// A message as delivered by the bus, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Create a message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Something that happened on the bus connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A session was established. Subscriptions must be reissued.
    Connected,
    /// A message arrived.
    Message(BusMessage),
    /// The broker accepted a subscription.
    Subscribed {
        /// Subscribed topic.
        topic: String,
    },
    /// The broker refused a subscription.
    SubscribeRejected {
        /// Refused topic.
        topic: String,
    },
    /// The broker closed the session.
    Disconnected(String),
    /// Protocol traffic with nothing for the subscriber to act on.
    Idle,
}

/// State of the bus connection as seen by the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not yet connected, or waiting to reconnect.
    Connecting,
    /// Session established and subscriptions issued.
    Connected,
    /// The subscriber has stopped.
    Closed,
}

impl ConnectionStatus {
    /// Whether messages can currently flow.
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

/// A connection to the message bus.
///
/// Implementations own the connection. `poll` drives it: a failed poll is
/// reported as a [`TransportError`] and the next call reconnects.
#[async_trait]
pub trait BusTransport: Send {
    /// Wait for the next event on the connection.
    async fn poll(&mut self) -> Result<TransportEvent, TransportError>;

    /// Request a subscription. The outcome arrives later through `poll`.
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Close the session cleanly.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: BusTransport + ?Sized> BusTransport for Box<T> {
    async fn poll(&mut self) -> Result<TransportEvent, TransportError> {
        (**self).poll().await
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        (**self).subscribe(topic).await
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect().await
    }
}
