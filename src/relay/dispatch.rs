//! Per-message routing: decode, validate, then hand to each enabled sink.

use std::sync::Arc;

use breathwatch_types::{decode, preview, Decoded, Reading, Summary, TopicMap};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broadcast::{Broadcaster, ViewerEvent};
use crate::config::RoutingConfig;
use crate::stats::{Counter, RelayStats};
use crate::store::{PersistQueue, PersistRecord};
use crate::subscribe::BusMessage;

/// What happened to one bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The topic has no route.
    Ignored,
    /// The payload could not be decoded. No sink was invoked.
    DecodeFailed,
    /// The record lacks fields every enabled sink requires.
    Rejected,
    /// The record was handed to its sinks.
    Routed {
        /// Queued for persistence.
        queued: bool,
        /// Viewers the event was delivered to, if broadcasting is enabled.
        viewers: Option<usize>,
    },
}

/// Routes decoded records to the broadcaster and the persistence queue.
///
/// Neither sink is awaited, so a slow store or viewer never holds up the
/// next message.
pub struct Dispatcher {
    topics: TopicMap,
    routing: RoutingConfig,
    broadcaster: Broadcaster,
    persist: PersistQueue,
    stats: Arc<RelayStats>,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        topics: TopicMap,
        routing: RoutingConfig,
        broadcaster: Broadcaster,
        persist: PersistQueue,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            topics,
            routing,
            broadcaster,
            persist,
            stats,
        }
    }

    /// Process messages in arrival order until the subscriber goes away.
    pub async fn run(self, mut messages: mpsc::Receiver<BusMessage>) {
        while let Some(message) = messages.recv().await {
            self.dispatch(&message);
        }
        debug!("Dispatcher drained");
    }

    /// Route one message.
    pub fn dispatch(&self, message: &BusMessage) -> Outcome {
        self.stats.record_received(&message.topic);

        let decoded = match decode(&self.topics, &message.topic, &message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    error = %e,
                    payload = %preview(&message.payload),
                    "Dropping undecodable message"
                );
                self.stats.incr(Counter::DecodeErrors);
                return Outcome::DecodeFailed;
            }
        };

        match decoded {
            Decoded::Reading(reading) => self.route_reading(&message.topic, reading),
            Decoded::Summary(summary) => self.route_summary(&message.topic, summary),
            Decoded::Ignored => {
                debug!(topic = %message.topic, "No route for topic");
                self.stats.incr(Counter::Ignored);
                Outcome::Ignored
            }
        }
    }

    fn route_reading(&self, topic: &str, reading: Reading) -> Outcome {
        let row = match reading.validate() {
            Ok(row) => row,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping incomplete reading");
                self.stats.incr(Counter::ValidationRejects);
                return Outcome::Rejected;
            }
        };

        let route = self.routing.raw;
        let queued = route.persist && self.persist.enqueue(PersistRecord::Reading(row));
        let viewers = route
            .broadcast
            .then(|| self.broadcast(ViewerEvent::Data(reading)));
        Outcome::Routed { queued, viewers }
    }

    fn route_summary(&self, topic: &str, summary: Summary) -> Outcome {
        let route = self.routing.summary;

        let queued = if route.persist {
            match summary.validate() {
                Ok(row) => self.persist.enqueue(PersistRecord::Summary(row)),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Not persisting incomplete summary");
                    self.stats.incr(Counter::ValidationRejects);
                    if !route.broadcast {
                        return Outcome::Rejected;
                    }
                    false
                }
            }
        } else {
            false
        };

        let viewers = route
            .broadcast
            .then(|| self.broadcast(ViewerEvent::Summary(summary)));
        Outcome::Routed { queued, viewers }
    }

    fn broadcast(&self, event: ViewerEvent) -> usize {
        self.stats.incr(Counter::Broadcast);
        self.broadcaster.publish(event)
    }
}
