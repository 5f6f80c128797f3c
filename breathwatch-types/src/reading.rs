//! Reading - one periodic sample from the raw topic.

use serde::{Deserialize, Serialize};

use crate::{RecordKind, ValidationError};

/// One sample published by the sensor on the raw topic.
///
/// Every field is optional on the wire. `breath_volume` and `timestamp` are
/// required before the reading may be persisted or broadcast; see
/// [`Reading::validate`].
///
/// The serialized form is the flattened event pushed to viewers, using the
/// same field names the firmware publishes (with `breath_volume` as the
/// canonical name for volume).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reading {
    /// Sequence number. Monotonic per source but wraps and restarts with the
    /// device, so it is never used for ordering.
    pub seq: Option<u64>,

    /// Flow rate in L/s.
    pub flow: Option<f64>,

    /// Cumulative breath volume in L.
    pub breath_volume: Option<f64>,

    /// Sensor temperature in °C.
    pub temp: Option<f64>,

    /// Heart rate in BPM.
    pub heart_rate: Option<i64>,

    /// Whether `heart_rate` is a valid measurement.
    pub hr_valid: Option<bool>,

    /// Blood oxygen saturation in percent.
    pub spo2: Option<i64>,

    /// Whether `spo2` is a valid measurement.
    pub spo2_valid: Option<bool>,

    /// Whether an exercise session is running.
    pub exercise_active: Option<bool>,

    /// Milliseconds left in the exercise session.
    pub time_remaining: Option<u64>,

    /// Breaths counted in the current session.
    pub breath_count: Option<u64>,

    /// Producer clock in milliseconds (not receipt time).
    pub timestamp: Option<u64>,
}

/// The values of a [`Reading`] that the store accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingRow {
    /// Cumulative breath volume.
    pub breath_volume: f64,
    /// Producer timestamp.
    pub timestamp: u64,
}

impl Reading {
    /// Check that the reading carries the fields every sink requires.
    ///
    /// Returns the row to insert, or a [`ValidationError`] naming every
    /// missing field.
    ///
    /// ```rust
    /// use breathwatch_types::Reading;
    ///
    /// let reading = Reading { seq: Some(2), ..Default::default() };
    /// let err = reading.validate().unwrap_err();
    /// assert_eq!(err.missing(), ["breath_volume", "timestamp"]);
    /// ```
    pub fn validate(&self) -> Result<ReadingRow, ValidationError> {
        match (self.breath_volume, self.timestamp) {
            (Some(breath_volume), Some(timestamp)) => Ok(ReadingRow {
                breath_volume,
                timestamp,
            }),
            (volume, timestamp) => {
                let mut fields = Vec::with_capacity(2);
                if volume.is_none() {
                    fields.push("breath_volume");
                }
                if timestamp.is_none() {
                    fields.push("timestamp");
                }
                Err(ValidationError::MissingFields {
                    record: RecordKind::Reading,
                    fields,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_complete() {
        let reading = Reading {
            breath_volume: Some(0.45),
            timestamp: Some(1000),
            ..Default::default()
        };
        let row = reading.validate().unwrap();
        assert_eq!(row.breath_volume, 0.45);
        assert_eq!(row.timestamp, 1000);
    }

    #[test]
    fn test_validate_missing_timestamp() {
        let reading = Reading {
            breath_volume: Some(1.0),
            ..Default::default()
        };
        assert_eq!(reading.validate().unwrap_err().missing(), ["timestamp"]);
    }

    #[test]
    fn test_serialized_event_is_flat() {
        let reading = Reading {
            seq: Some(7),
            breath_volume: Some(450.0),
            hr_valid: Some(true),
            timestamp: Some(1000),
            ..Default::default()
        };
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["breath_volume"], 450.0);
        assert_eq!(json["hr_valid"], true);
        assert!(json["spo2"].is_null());
        assert_eq!(json.as_object().unwrap().len(), 12);
    }
}
