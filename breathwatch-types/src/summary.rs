//! Summary - the end-of-session report.

use serde::{Deserialize, Serialize};

use crate::{RecordKind, ValidationError};

/// A session summary published on the summary topic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    /// Average inhaled volume over the session.
    pub avg_inhaled_volume: Option<f64>,
    /// Breaths counted over the session.
    pub total_breaths: Option<u64>,
    /// Session length in seconds.
    pub duration: Option<u64>,
    /// Heart rate at the end of the session.
    pub final_heart_rate: Option<i64>,
    /// SpO2 at the end of the session.
    pub final_spo2: Option<i64>,
}

/// The values of a [`Summary`] that the store accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryRow {
    /// Average inhaled volume.
    pub avg_inhaled_volume: f64,
    /// Total breaths.
    pub total_breaths: u64,
    /// Session duration in seconds.
    pub duration: u64,
}

impl Summary {
    /// Check that average volume, breath count and duration are all present.
    ///
    /// A summary is persisted whole or not at all.
    pub fn validate(&self) -> Result<SummaryRow, ValidationError> {
        if let (Some(avg_inhaled_volume), Some(total_breaths), Some(duration)) =
            (self.avg_inhaled_volume, self.total_breaths, self.duration)
        {
            return Ok(SummaryRow {
                avg_inhaled_volume,
                total_breaths,
                duration,
            });
        }

        let fields = [
            ("avg_inhaled_volume", self.avg_inhaled_volume.is_none()),
            ("total_breaths", self.total_breaths.is_none()),
            ("duration", self.duration.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect();

        Err(ValidationError::MissingFields {
            record: RecordKind::Summary,
            fields,
        })
    }
}
