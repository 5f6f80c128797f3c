//! Durable storage for accepted records.
//!
//! [`RecordStore`] is the seam between the relay and the database. The
//! production implementation is [`MySqlStore`]; tests use the in-memory
//! store from the `testing` feature.
//!
//! The table layout is an external contract:
//!
//! | Table                          | Columns written                                  |
//! |--------------------------------|--------------------------------------------------|
//! | `breath_measurements`          | `breath_volume`, `timestamp`                     |
//! | `breath_measurements_average`  | `avg_inhaled_volume`, `total_breaths`, `duration` |

mod mysql;
mod sink;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use breathwatch_types::{ReadingRow, SummaryRow};
use serde::Serialize;

use crate::error::StoreError;

pub use mysql::MySqlStore;
pub use sink::{
    BoundedRetry, NoRetry, PersistQueue, PersistRecord, PersistenceSink, RetryPolicy,
};

/// A stored reading, as read back by the legacy table endpoint.
///
/// Values are kept as the text the database renders so the endpoint does
/// not depend on exact column types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StoredReading {
    /// Row id.
    pub id: String,
    /// Breath volume.
    pub breath_volume: String,
    /// Producer timestamp.
    pub timestamp: String,
    /// Insert time, if the table records one.
    pub created_at: Option<String>,
}

/// Insert and read operations against the record store.
///
/// Implementations serialize their own writes; callers may share one
/// instance behind an `Arc`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append one reading.
    async fn append_reading(&self, row: &ReadingRow) -> Result<(), StoreError>;

    /// Append one session summary.
    async fn append_summary(&self, row: &SummaryRow) -> Result<(), StoreError>;

    /// The `limit` most recent readings, newest first.
    async fn recent_readings(&self, limit: u32) -> Result<Vec<StoredReading>, StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release the connection. Further calls fail.
    async fn close(&self);
}

/// Health of the store connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreHealth {
    /// The last operation succeeded.
    Healthy,
    /// The last operation hit a connectivity failure.
    Degraded,
}

/// Shared, lock-free store health.
#[derive(Debug, Clone)]
pub struct HealthFlag(Arc<AtomicBool>);

impl Default for HealthFlag {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl HealthFlag {
    /// Current health.
    pub fn get(&self) -> StoreHealth {
        if self.0.load(Ordering::Relaxed) {
            StoreHealth::Healthy
        } else {
            StoreHealth::Degraded
        }
    }

    /// Record the outcome of an operation. Returns `true` if health changed.
    pub fn set(&self, health: StoreHealth) -> bool {
        let healthy = health == StoreHealth::Healthy;
        self.0.swap(healthy, Ordering::Relaxed) != healthy
    }
}
