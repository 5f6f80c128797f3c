//! The subscriber loop: keeps the bus connection alive and feeds the
//! pipeline.

use std::time::Duration;

use breathwatch_types::TopicMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BusMessage, BusTransport, ConnectionStatus, TransportEvent};
use crate::config::duration::format_duration;

/// Bounded exponential backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    /// Start at `min`, doubling up to `max`.
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, next: min }
    }

    /// Delay to wait now. Each call doubles the following delay.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// Go back to the minimum delay after a successful connect.
    pub fn reset(&mut self) {
        self.next = self.min;
    }
}

/// Maintains the bus session and forwards every message to the pipeline.
///
/// Transport failures never end the loop. Only cancellation, or the
/// pipeline dropping its receiver, does.
pub struct BusSubscriber<T> {
    transport: T,
    topics: Vec<String>,
    sender: mpsc::Sender<BusMessage>,
    status: watch::Sender<ConnectionStatus>,
    backoff: Backoff,
}

impl<T: BusTransport> BusSubscriber<T> {
    /// Create a subscriber for the topics in `topics`.
    pub fn new(
        transport: T,
        topics: &TopicMap,
        sender: mpsc::Sender<BusMessage>,
        backoff: Backoff,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Self {
            transport,
            topics: topics.topics().iter().map(|t| t.to_string()).collect(),
            sender,
            status,
            backoff,
        }
    }

    /// Watch the connection status.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Run until `cancel` fires or the pipeline goes away.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(topics = ?self.topics, "Bus subscriber started");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.transport.poll() => event,
            };

            match event {
                Ok(TransportEvent::Connected) => {
                    self.backoff.reset();
                    info!("Connected to bus, subscribing to {} topics", self.topics.len());
                    self.subscribe_all().await;
                    self.status.send_replace(ConnectionStatus::Connected);
                }
                Ok(TransportEvent::Message(message)) => {
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = self.sender.send(message) => sent,
                    };
                    if sent.is_err() {
                        info!("Pipeline closed, stopping bus subscriber");
                        break;
                    }
                }
                Ok(TransportEvent::Subscribed { topic }) => {
                    debug!(topic = %topic, "Subscription acknowledged");
                }
                Ok(TransportEvent::SubscribeRejected { topic }) => {
                    warn!(topic = %topic, "Broker rejected subscription");
                }
                Ok(TransportEvent::Disconnected(reason)) => {
                    warn!(reason = %reason, "Bus session closed by broker");
                    if !self.wait_to_reconnect(&cancel).await {
                        break;
                    }
                }
                Ok(TransportEvent::Idle) => {}
                Err(e) => {
                    warn!(error = %e, "Bus transport error");
                    if !self.wait_to_reconnect(&cancel).await {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.transport.disconnect().await {
            debug!(error = %e, "Bus disconnect failed");
        }
        self.status.send_replace(ConnectionStatus::Closed);
        info!("Bus subscriber stopped");
    }

    /// Issue every subscription. One refused topic does not stop the rest.
    async fn subscribe_all(&mut self) {
        for topic in &self.topics {
            match self.transport.subscribe(topic).await {
                Ok(()) => debug!(topic = %topic, "Subscription requested"),
                Err(e) => warn!(topic = %topic, error = %e, "Failed to subscribe"),
            }
        }
    }

    /// Sleep for the next backoff delay. Returns `false` if cancelled.
    async fn wait_to_reconnect(&mut self, cancel: &CancellationToken) -> bool {
        self.status.send_replace(ConnectionStatus::Connecting);
        let delay = self.backoff.next_delay();
        debug!("Reconnecting to bus in {}", format_duration(delay));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::ScriptedTransport;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(10), Duration::from_millis(40))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = backoff();
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, [10, 20, 40, 40]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_reconnect() {
        let (transport, script) = ScriptedTransport::new();
        let (tx, mut rx) = mpsc::channel(8);
        let topics = TopicMap::default();
        let subscriber = BusSubscriber::new(transport, &topics, tx, backoff());
        let mut status = subscriber.status();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(subscriber.run(cancel.clone()));

        script.connect();
        script.message("sensor/sfm3003/raw", "{}");
        assert_eq!(rx.recv().await.unwrap().topic, "sensor/sfm3003/raw");
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Connected);

        script.fail(TransportError::Connection("reset by peer".into()));
        script.connect();
        script.message("sensor/sfm3003/summary", "{}");
        assert_eq!(rx.recv().await.unwrap().topic, "sensor/sfm3003/summary");

        assert_eq!(
            script.subscriptions(),
            [
                "sensor/sfm3003/raw",
                "sensor/sfm3003/summary",
                "sensor/sfm3003/raw",
                "sensor/sfm3003/summary",
            ]
        );

        cancel.cancel();
        task.await.unwrap();
        assert!(script.disconnected());
        assert_eq!(*status.borrow(), ConnectionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_subscription_does_not_block_others() {
        let (transport, script) = ScriptedTransport::new();
        script.refuse_topic("sensor/sfm3003/raw");
        let (tx, mut rx) = mpsc::channel(8);
        let subscriber = BusSubscriber::new(transport, &TopicMap::default(), tx, backoff());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(subscriber.run(cancel.clone()));

        script.connect();
        script.message("sensor/sfm3003/summary", "{}");
        rx.recv().await.unwrap();

        assert_eq!(
            script.subscriptions(),
            ["sensor/sfm3003/raw", "sensor/sfm3003/summary"]
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_pipeline_closes() {
        let (transport, script) = ScriptedTransport::new();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let subscriber = BusSubscriber::new(transport, &TopicMap::default(), tx, backoff());

        script.connect();
        script.message("sensor/sfm3003/raw", "{}");
        subscriber.run(CancellationToken::new()).await;
        assert!(script.disconnected());
    }
}
