//! Relay counters.
//!
//! Errors that are contained at a component boundary surface here and in
//! the logs, nowhere else. Counters are lock-free; the per-topic table takes
//! a read lock on the hot path and a write lock only the first time a topic
//! is seen.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Events counted by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Messages delivered by the bus.
    Received,
    /// Messages on topics with no route.
    Ignored,
    /// Payloads that could not be decoded.
    DecodeErrors,
    /// Records missing fields a sink requires.
    ValidationRejects,
    /// Events handed to the broadcaster.
    Broadcast,
    /// Records written to the store.
    Persisted,
    /// Records the store failed to write.
    PersistFailures,
    /// Records dropped because the persist queue was full or closed.
    PersistDropped,
    /// Events a slow viewer missed.
    ViewerLagged,
}

impl Counter {
    const ALL: [Counter; 9] = [
        Counter::Received,
        Counter::Ignored,
        Counter::DecodeErrors,
        Counter::ValidationRejects,
        Counter::Broadcast,
        Counter::Persisted,
        Counter::PersistFailures,
        Counter::PersistDropped,
        Counter::ViewerLagged,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Snake-case name used in logs and the health report.
    pub fn name(self) -> &'static str {
        match self {
            Counter::Received => "received",
            Counter::Ignored => "ignored",
            Counter::DecodeErrors => "decode_errors",
            Counter::ValidationRejects => "validation_rejects",
            Counter::Broadcast => "broadcast",
            Counter::Persisted => "persisted",
            Counter::PersistFailures => "persist_failures",
            Counter::PersistDropped => "persist_dropped",
            Counter::ViewerLagged => "viewer_lagged",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared counters for one relay instance.
#[derive(Debug, Default)]
pub struct RelayStats {
    counters: [AtomicU64; 9],
    per_topic: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
}

impl RelayStats {
    /// Create a zeroed set of counters behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add one to a counter.
    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Add `n` to a counter.
    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    /// Current value of a counter.
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Count a message received on `topic`.
    pub fn record_received(&self, topic: &str) {
        self.incr(Counter::Received);
        self.topic_counter(topic).fetch_add(1, Ordering::Relaxed);
    }

    /// Messages received on `topic` so far.
    pub fn received_on(&self, topic: &str) -> u64 {
        self.per_topic
            .read()
            .get(topic)
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn topic_counter(&self, topic: &str) -> Arc<AtomicU64> {
        {
            let topics = self.per_topic.read();
            if let Some(count) = topics.get(topic) {
                return count.clone();
            }
        }

        self.per_topic
            .write()
            .entry(topic.to_string())
            .or_default()
            .clone()
    }

    /// Copy every counter into a serializable snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = Counter::ALL
            .iter()
            .map(|counter| (counter.name(), self.get(*counter)))
            .collect();
        let topics = self
            .per_topic
            .read()
            .iter()
            .map(|(topic, count)| (topic.clone(), count.load(Ordering::Relaxed)))
            .collect();
        StatsSnapshot { counters, topics }
    }
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Global counters by name.
    #[serde(flatten)]
    pub counters: BTreeMap<&'static str, u64>,
    /// Messages received per topic.
    pub topics: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    /// Value of a counter in the snapshot.
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters.get(counter.name()).copied().unwrap_or(0)
    }
}
