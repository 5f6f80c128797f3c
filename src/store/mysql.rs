//! MySQL store on a single pooled connection.

use async_trait::async_trait;
use breathwatch_types::{ReadingRow, SummaryRow};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tracing::info;

use super::{RecordStore, StoredReading};
use crate::config::StoreConfig;
use crate::error::StoreError;

const INSERT_READING: &str =
    "INSERT INTO breath_measurements (breath_volume, timestamp) VALUES (?, ?)";

const INSERT_SUMMARY: &str = "INSERT INTO breath_measurements_average \
     (avg_inhaled_volume, total_breaths, duration) VALUES (?, ?, ?)";

const SELECT_RECENT: &str = "SELECT CAST(id AS CHAR) AS id, \
     CAST(breath_volume AS CHAR) AS breath_volume, \
     CAST(timestamp AS CHAR) AS timestamp, \
     CAST(created_at AS CHAR) AS created_at \
     FROM breath_measurements ORDER BY id DESC LIMIT ?";

/// Record store backed by MySQL.
///
/// The pool holds exactly one connection, so writes are serialized.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Open the pool and its single connection.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.url)
            .await?;

        info!("Connected to record store");
        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for MySqlStore {
    async fn append_reading(&self, row: &ReadingRow) -> Result<(), StoreError> {
        sqlx::query(INSERT_READING)
            .bind(row.breath_volume)
            .bind(row.timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_summary(&self, row: &SummaryRow) -> Result<(), StoreError> {
        sqlx::query(INSERT_SUMMARY)
            .bind(row.avg_inhaled_volume)
            .bind(row.total_breaths)
            .bind(row.duration)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_readings(&self, limit: u32) -> Result<Vec<StoredReading>, StoreError> {
        let rows = sqlx::query_as::<_, StoredReading>(SELECT_RECENT)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
