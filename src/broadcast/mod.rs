//! Live fan-out of records to connected viewers.
//!
//! Each viewer has its own bounded ring (a `tokio::sync::broadcast`
//! receiver). Publishing never waits: when a viewer falls more than
//! `buffer` events behind, its oldest events are overwritten and it skips
//! ahead on the next receive. Other viewers and the pipeline are unaffected.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use breathwatch_types::{Reading, Summary};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::stats::{Counter, RelayStats};

/// An event pushed to viewers.
///
/// Serialized as `{"event":"data","data":{...}}`, with the record's fields
/// flattened under `data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ViewerEvent {
    /// A raw reading.
    Data(Reading),
    /// A session summary, when routing enables it.
    Summary(Summary),
}

impl ViewerEvent {
    /// Render the wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Fans events out to every subscribed [`Viewer`].
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<ViewerEvent>>,
    members: Arc<Mutex<BTreeSet<u64>>>,
    next_id: Arc<AtomicU64>,
    closed: CancellationToken,
    stats: Arc<RelayStats>,
}

impl Broadcaster {
    /// Create a broadcaster buffering up to `buffer` events per viewer.
    pub fn new(buffer: usize, stats: Arc<RelayStats>) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            members: Arc::default(),
            next_id: Arc::new(AtomicU64::new(1)),
            closed: CancellationToken::new(),
            stats,
        }
    }

    /// Deliver an event to every current viewer.
    ///
    /// Returns the number of viewers it was queued for. Zero viewers is not
    /// an error.
    pub fn publish(&self, event: ViewerEvent) -> usize {
        if self.closed.is_cancelled() {
            return 0;
        }
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    /// Join the viewer set. Events published from now on are delivered.
    pub fn subscribe(&self) -> Viewer {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.members.lock().insert(id);
        debug!(viewer = id, "Viewer joined");

        Viewer {
            id,
            rx: self.tx.subscribe(),
            closed: self.closed.clone(),
            stats: self.stats.clone(),
            _membership: Membership {
                id,
                members: self.members.clone(),
            },
        }
    }

    /// Leave the viewer set. Equivalent to dropping the viewer.
    pub fn unsubscribe(&self, viewer: Viewer) {
        drop(viewer);
    }

    /// Number of viewers currently subscribed.
    pub fn viewer_count(&self) -> usize {
        self.members.lock().len()
    }

    /// Ids of the viewers currently subscribed.
    pub fn viewer_ids(&self) -> Vec<u64> {
        self.members.lock().iter().copied().collect()
    }

    /// Stop delivering. Every pending and future [`Viewer::recv`] returns
    /// `None`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// One subscribed viewer.
#[derive(Debug)]
pub struct Viewer {
    id: u64,
    rx: broadcast::Receiver<Arc<ViewerEvent>>,
    closed: CancellationToken,
    stats: Arc<RelayStats>,
    _membership: Membership,
}

impl Viewer {
    /// Identifier, unique per broadcaster.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the broadcaster is closed.
    ///
    /// Events overwritten while this viewer was behind are skipped and
    /// counted.
    pub async fn recv(&mut self) -> Option<Arc<ViewerEvent>> {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return None,
                received = self.rx.recv() => received,
            };

            match received {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(viewer = self.id, skipped, "Viewer lagged");
                    self.stats.add(Counter::ViewerLagged, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Removes the viewer from the membership set on drop.
#[derive(Debug)]
struct Membership {
    id: u64,
    members: Arc<Mutex<BTreeSet<u64>>>,
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.members.lock().remove(&self.id);
        debug!(viewer = self.id, "Viewer left");
    }
}
