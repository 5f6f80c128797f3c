//! In-memory doubles for the store and the bus.
//!
//! Used by the unit and integration tests, and handy for running the
//! relay without infrastructure. Built only with the `testing` feature.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use breathwatch_types::{ReadingRow, SummaryRow};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{StoreError, TransportError};
use crate::store::{RecordStore, StoredReading};
use crate::subscribe::{BusMessage, BusTransport, TransportEvent};

/// How [`MemoryStore`] answers writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreMode {
    /// Accept everything.
    #[default]
    Normal,
    /// Fail with [`StoreError::Unavailable`].
    Outage,
    /// Fail with [`StoreError::Query`].
    Reject,
    /// Never answer.
    Stall,
}

#[derive(Debug, Default)]
struct StoreInner {
    readings: Vec<ReadingRow>,
    summaries: Vec<SummaryRow>,
    mode: StoreMode,
    fail_next: u32,
    attempts: usize,
    closed: bool,
}

/// A [`RecordStore`] that keeps rows in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    /// An empty store behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Change how writes are answered.
    pub fn set_mode(&self, mode: StoreMode) {
        self.inner.lock().mode = mode;
    }

    /// Fail the next `n` writes with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.inner.lock().fail_next = n;
    }

    /// Add a reading directly, bypassing the mode.
    pub fn insert_reading(&self, row: ReadingRow) {
        self.inner.lock().readings.push(row);
    }

    /// Readings written so far, oldest first.
    pub fn readings(&self) -> Vec<ReadingRow> {
        self.inner.lock().readings.clone()
    }

    /// Summaries written so far, oldest first.
    pub fn summaries(&self) -> Vec<SummaryRow> {
        self.inner.lock().summaries.clone()
    }

    /// Write attempts made, successful or not.
    pub fn attempts(&self) -> usize {
        self.inner.lock().attempts
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Count an attempt and decide its fate. `None` means stall.
    fn admit(&self) -> Option<Result<(), StoreError>> {
        let mut inner = self.inner.lock();
        inner.attempts += 1;
        if inner.closed {
            return Some(Err(StoreError::Unavailable("store closed".into())));
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Some(Err(StoreError::Unavailable("injected failure".into())));
        }
        match inner.mode {
            StoreMode::Normal => Some(Ok(())),
            StoreMode::Outage => Some(Err(StoreError::Unavailable("simulated outage".into()))),
            StoreMode::Reject => Some(Err(StoreError::Query("simulated rejection".into()))),
            StoreMode::Stall => None,
        }
    }

    async fn write(&self, apply: impl FnOnce(&mut StoreInner)) -> Result<(), StoreError> {
        match self.admit() {
            Some(Ok(())) => {
                apply(&mut self.inner.lock());
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn append_reading(&self, row: &ReadingRow) -> Result<(), StoreError> {
        let row = *row;
        self.write(move |inner| inner.readings.push(row)).await
    }

    async fn append_summary(&self, row: &SummaryRow) -> Result<(), StoreError> {
        let row = *row;
        self.write(move |inner| inner.summaries.push(row)).await
    }

    async fn recent_readings(&self, limit: u32) -> Result<Vec<StoredReading>, StoreError> {
        let inner = self.inner.lock();
        match inner.mode {
            StoreMode::Outage | StoreMode::Stall => {
                return Err(StoreError::Unavailable("simulated outage".into()))
            }
            StoreMode::Reject => return Err(StoreError::Query("simulated rejection".into())),
            StoreMode::Normal => {}
        }

        Ok(inner
            .readings
            .iter()
            .enumerate()
            .rev()
            .take(limit as usize)
            .map(|(index, row)| StoredReading {
                id: (index + 1).to_string(),
                breath_volume: row.breath_volume.to_string(),
                timestamp: row.timestamp.to_string(),
                created_at: None,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self.inner.lock().mode {
            StoreMode::Normal | StoreMode::Reject => Ok(()),
            _ => Err(StoreError::Unavailable("simulated outage".into())),
        }
    }

    async fn close(&self) {
        self.inner.lock().closed = true;
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    subscriptions: Vec<String>,
    refused: HashSet<String>,
    disconnected: bool,
}

/// A [`BusTransport`] driven by a [`Script`].
///
/// `poll` returns scripted events in order and waits when the script is
/// empty.
#[derive(Debug)]
pub struct ScriptedTransport {
    events: mpsc::UnboundedReceiver<Result<TransportEvent, TransportError>>,
    state: Arc<Mutex<ScriptState>>,
}

/// Controls a [`ScriptedTransport`] from the test.
#[derive(Debug, Clone)]
pub struct Script {
    events: mpsc::UnboundedSender<Result<TransportEvent, TransportError>>,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// A transport and its script.
    pub fn new() -> (Self, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ScriptState::default()));
        (
            Self {
                events: rx,
                state: state.clone(),
            },
            Script { events: tx, state },
        )
    }
}

impl Script {
    /// Queue an event.
    pub fn push(&self, event: TransportEvent) {
        let _ = self.events.send(Ok(event));
    }

    /// Queue a session start.
    pub fn connect(&self) {
        self.push(TransportEvent::Connected);
    }

    /// Queue a message.
    pub fn message(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.push(TransportEvent::Message(BusMessage::new(topic, payload)));
    }

    /// Queue a connection failure.
    pub fn fail(&self, error: TransportError) {
        let _ = self.events.send(Err(error));
    }

    /// Make `subscribe` fail for `topic`.
    pub fn refuse_topic(&self, topic: &str) {
        self.state.lock().refused.insert(topic.to_string());
    }

    /// Every subscription requested, in order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    /// Whether `disconnect` was called.
    pub fn disconnected(&self) -> bool {
        self.state.lock().disconnected
    }
}

#[async_trait]
impl BusTransport for ScriptedTransport {
    async fn poll(&mut self) -> Result<TransportEvent, TransportError> {
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.subscriptions.push(topic.to_string());
        if state.refused.contains(topic) {
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "refused by script".to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.state.lock().disconnected = true;
        Ok(())
    }
}

/// Wait until `condition` holds, polling every 10ms for up to five seconds.
///
/// # Panics
///
/// Panics if the condition does not hold in time.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
