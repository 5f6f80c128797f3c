//! Persistence sink: bounded attempts against the store, off the hot path.
//!
//! The dispatcher never awaits the store. It hands records to a
//! [`PersistQueue`], and a single worker task drains the queue in order,
//! so the store sees one writer and readings are inserted in arrival order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use breathwatch_types::{ReadingRow, SummaryRow};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{HealthFlag, RecordStore, StoreHealth};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::stats::{Counter, RelayStats};

/// A validated record bound for the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PersistRecord {
    /// Insert into the readings table.
    Reading(ReadingRow),
    /// Insert into the summaries table.
    Summary(SummaryRow),
}

impl PersistRecord {
    /// What the insert is for, used in failure logs.
    pub fn intent(&self) -> &'static str {
        match self {
            PersistRecord::Reading(_) => "append reading",
            PersistRecord::Summary(_) => "append summary",
        }
    }
}

/// Decides whether a failed attempt is tried again.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Delay before the next attempt, given the 1-based number of the
    /// attempt that just failed. `None` drops the record.
    fn retry_after(&self, attempt: u32, error: &StoreError) -> Option<Duration>;
}

/// One attempt per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn retry_after(&self, _attempt: u32, _error: &StoreError) -> Option<Duration> {
        None
    }
}

/// Retry transient failures a fixed number of times with linear backoff.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRetry {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay after the first failure; grows linearly.
    pub backoff: Duration,
}

impl RetryPolicy for BoundedRetry {
    fn retry_after(&self, attempt: u32, error: &StoreError) -> Option<Duration> {
        (attempt < self.attempts && error.is_transient()).then(|| self.backoff * attempt)
    }
}

/// Writes records to a [`RecordStore`].
pub struct PersistenceSink {
    store: Arc<dyn RecordStore>,
    retry: Box<dyn RetryPolicy>,
    attempt_timeout: Duration,
    health: HealthFlag,
    stats: Arc<RelayStats>,
    stopping: CancellationToken,
}

impl PersistenceSink {
    /// A sink with no retry and a five second attempt timeout.
    pub fn new(store: Arc<dyn RecordStore>, stats: Arc<RelayStats>) -> Self {
        Self {
            store,
            retry: Box::new(NoRetry),
            attempt_timeout: Duration::from_secs(5),
            health: HealthFlag::default(),
            stats,
            stopping: CancellationToken::new(),
        }
    }

    /// A sink configured from the `[store]` section.
    pub fn from_config(
        store: Arc<dyn RecordStore>,
        config: &StoreConfig,
        stats: Arc<RelayStats>,
    ) -> Self {
        let sink = Self::new(store, stats).with_timeout(config.query_timeout);
        if config.retry_attempts > 1 {
            sink.with_retry(BoundedRetry {
                attempts: config.retry_attempts,
                backoff: config.retry_backoff,
            })
        } else {
            sink
        }
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Box::new(policy);
        self
    }

    /// Bound each attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Stop retrying once `token` is cancelled.
    pub fn with_stopping(mut self, token: CancellationToken) -> Self {
        self.stopping = token;
        self
    }

    /// Shared health flag, updated after every attempt.
    pub fn health(&self) -> HealthFlag {
        self.health.clone()
    }

    /// Write one record, retrying per policy.
    pub async fn persist(&self, record: &PersistRecord) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.attempt(record).await {
                Ok(()) => {
                    if self.health.set(StoreHealth::Healthy) {
                        info!("Record store recovered");
                    }
                    self.stats.incr(Counter::Persisted);
                    return Ok(());
                }
                Err(e) => {
                    if e.is_transient() && self.health.set(StoreHealth::Degraded) {
                        error!(error = %e, "Record store degraded");
                    }

                    let delay = match self.retry.retry_after(attempt, &e) {
                        Some(delay) if !self.stopping.is_cancelled() => delay,
                        _ => {
                            warn!(
                                intent = record.intent(),
                                attempt,
                                error = %e,
                                "Dropping record after store failure"
                            );
                            self.stats.incr(Counter::PersistFailures);
                            return Err(e);
                        }
                    };

                    debug!(intent = record.intent(), attempt, ?delay, error = %e, "Retrying store write");
                    tokio::select! {
                        _ = self.stopping.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, record: &PersistRecord) -> Result<(), StoreError> {
        let write = async {
            match record {
                PersistRecord::Reading(row) => self.store.append_reading(row).await,
                PersistRecord::Summary(row) => self.store.append_summary(row).await,
            }
        };
        tokio::time::timeout(self.attempt_timeout, write)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.attempt_timeout)))
    }

    /// Start the worker. It runs until every [`PersistQueue`] clone is
    /// dropped and the queue is empty.
    pub fn spawn(self, capacity: usize) -> (PersistQueue, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = PersistQueue {
            tx,
            stats: self.stats.clone(),
        };
        let handle = tokio::spawn(self.run(rx));
        (queue, handle)
    }

    async fn run(self, mut rx: mpsc::Receiver<PersistRecord>) {
        debug!("Persistence worker started");
        while let Some(record) = rx.recv().await {
            // Failures are logged and counted inside persist.
            let _ = self.persist(&record).await;
        }
        debug!("Persistence worker stopped");
    }
}

impl fmt::Debug for PersistenceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceSink")
            .field("retry", &self.retry)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("health", &self.health.get())
            .finish_non_exhaustive()
    }
}

/// Producer side of the persistence worker's queue.
#[derive(Debug, Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<PersistRecord>,
    stats: Arc<RelayStats>,
}

impl PersistQueue {
    /// Queue a record without waiting. A full or closed queue drops it.
    pub fn enqueue(&self, record: PersistRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                warn!(intent = record.intent(), "Persist queue full, dropping record");
                self.stats.incr(Counter::PersistDropped);
                false
            }
            Err(TrySendError::Closed(record)) => {
                debug!(intent = record.intent(), "Persist queue closed, dropping record");
                self.stats.incr(Counter::PersistDropped);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStore, StoreMode};

    fn reading(volume: f64, timestamp: u64) -> PersistRecord {
        PersistRecord::Reading(ReadingRow {
            breath_volume: volume,
            timestamp,
        })
    }

    #[tokio::test]
    async fn test_persist_reading_and_summary() {
        let store = MemoryStore::shared();
        let stats = RelayStats::shared();
        let sink = PersistenceSink::new(store.clone(), stats.clone());

        sink.persist(&reading(450.0, 1000)).await.unwrap();
        sink.persist(&PersistRecord::Summary(SummaryRow {
            avg_inhaled_volume: 500.0,
            total_breaths: 10,
            duration: 60,
        }))
        .await
        .unwrap();

        assert_eq!(store.readings(), [ReadingRow { breath_volume: 450.0, timestamp: 1000 }]);
        assert_eq!(store.summaries().len(), 1);
        assert_eq!(stats.get(Counter::Persisted), 2);
    }

    #[tokio::test]
    async fn test_outage_degrades_then_recovers() {
        let store = MemoryStore::shared();
        let stats = RelayStats::shared();
        let sink = PersistenceSink::new(store.clone(), stats.clone());
        let health = sink.health();

        store.set_mode(StoreMode::Outage);
        let err = sink.persist(&reading(1.0, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(health.get(), StoreHealth::Degraded);
        assert_eq!(stats.get(Counter::PersistFailures), 1);
        assert!(store.readings().is_empty());

        store.set_mode(StoreMode::Normal);
        sink.persist(&reading(2.0, 2)).await.unwrap();
        assert_eq!(health.get(), StoreHealth::Healthy);
    }

    #[tokio::test]
    async fn test_rejected_statement_keeps_health() {
        let store = MemoryStore::shared();
        store.set_mode(StoreMode::Reject);
        let sink = PersistenceSink::new(store, RelayStats::shared());

        assert!(sink.persist(&reading(1.0, 1)).await.is_err());
        assert_eq!(sink.health().get(), StoreHealth::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_times_out() {
        let store = MemoryStore::shared();
        store.set_mode(StoreMode::Stall);
        let sink = PersistenceSink::new(store, RelayStats::shared())
            .with_timeout(Duration::from_millis(250));

        let err = sink.persist(&reading(1.0, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(t) if t == Duration::from_millis(250)));
        assert_eq!(sink.health().get(), StoreHealth::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_recovers_transient_failures() {
        let store = MemoryStore::shared();
        store.fail_next(2);
        let sink = PersistenceSink::new(store.clone(), RelayStats::shared()).with_retry(
            BoundedRetry {
                attempts: 3,
                backoff: Duration::from_millis(100),
            },
        );

        sink.persist(&reading(1.0, 1)).await.unwrap();
        assert_eq!(store.attempts(), 3);
        assert_eq!(store.readings().len(), 1);
    }

    #[test]
    fn test_retry_policies() {
        let transient = StoreError::Unavailable("gone".into());
        let rejected = StoreError::Query("syntax".into());
        let policy = BoundedRetry {
            attempts: 3,
            backoff: Duration::from_millis(100),
        };

        assert_eq!(NoRetry.retry_after(1, &transient), None);
        assert_eq!(policy.retry_after(1, &transient), Some(Duration::from_millis(100)));
        assert_eq!(policy.retry_after(2, &transient), Some(Duration::from_millis(200)));
        assert_eq!(policy.retry_after(3, &transient), None);
        assert_eq!(policy.retry_after(1, &rejected), None);
    }

    #[tokio::test]
    async fn test_worker_preserves_order() {
        let store = MemoryStore::shared();
        let sink = PersistenceSink::new(store.clone(), RelayStats::shared());
        let (queue, handle) = sink.spawn(16);

        for ts in 0..10 {
            assert!(queue.enqueue(reading(1.0, ts)));
        }
        drop(queue);
        handle.await.unwrap();

        let timestamps: Vec<_> = store.readings().iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_waiting() {
        let store = MemoryStore::shared();
        store.set_mode(StoreMode::Stall);
        let stats = RelayStats::shared();
        let sink = PersistenceSink::new(store, stats.clone()).with_timeout(Duration::from_secs(60));
        let (queue, handle) = sink.spawn(1);

        let accepted = (0..5).filter(|ts| queue.enqueue(reading(1.0, *ts))).count();
        assert!(accepted < 5);
        assert_eq!(stats.get(Counter::PersistDropped), 5 - accepted as u64);
        handle.abort();
    }
}
