//! Payload decoder.
//!
//! Turns `(topic, bytes)` pairs from the bus into typed records. Decoding is
//! pure and synchronous: it allocates, but never blocks or performs I/O.
//!
//! ## Field aliases
//!
//! Producers have used different names for the same value over time. Each
//! record field lists its accepted names; the first one present (and not
//! `null`) wins:
//!
//! | Field                | Accepted names                        |
//! |----------------------|---------------------------------------|
//! | `breath_volume`      | `volume`, `breath_volume`             |
//! | `avg_inhaled_volume` | `avg_inhaled_volume`, `avg_volume`    |
//!
//! Validity flags accept booleans as well as the firmware's `0`/`1`.

use serde_json::{Map, Value};

use crate::{DecodeError, Reading, Summary, TopicKind, TopicMap};

/// Maximum number of payload bytes shown by [`preview`].
pub const PREVIEW_LIMIT: usize = 120;

/// Result of decoding one bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A sample from the raw topic.
    Reading(Reading),
    /// A session summary.
    Summary(Summary),
    /// A topic this relay has no route for. Produces no sink actions.
    Ignored,
}

impl Decoded {
    /// The topic kind the record came from, if any.
    pub fn kind(&self) -> Option<TopicKind> {
        match self {
            Decoded::Reading(_) => Some(TopicKind::Raw),
            Decoded::Summary(_) => Some(TopicKind::Summary),
            Decoded::Ignored => None,
        }
    }
}

/// Decode a bus message.
///
/// Unknown topics are not an error: they decode to [`Decoded::Ignored`]
/// without looking at the payload.
///
/// # Example
///
/// ```rust
/// use breathwatch_types::{decode, Decoded, DecodeError, TopicMap};
///
/// let topics = TopicMap::default();
///
/// let err = decode(&topics, "sensor/sfm3003/raw", b"{not json").unwrap_err();
/// assert!(matches!(err, DecodeError::Malformed(_)));
///
/// let ignored = decode(&topics, "sensor/status", b"anything").unwrap();
/// assert_eq!(ignored, Decoded::Ignored);
/// ```
pub fn decode(topics: &TopicMap, topic: &str, payload: &[u8]) -> Result<Decoded, DecodeError> {
    let Some(kind) = topics.classify(topic) else {
        return Ok(Decoded::Ignored);
    };

    let object = match serde_json::from_slice::<Value>(payload)? {
        Value::Object(map) => map,
        other => {
            return Err(DecodeError::NotAnObject {
                found: json_type(&other),
            })
        }
    };
    let fields = Fields(&object);

    match kind {
        TopicKind::Raw => decode_reading(&fields).map(Decoded::Reading),
        TopicKind::Summary => decode_summary(&fields).map(Decoded::Summary),
    }
}

fn decode_reading(fields: &Fields<'_>) -> Result<Reading, DecodeError> {
    Ok(Reading {
        seq: fields.unsigned(&["seq"])?,
        flow: fields.float(&["flow"])?,
        breath_volume: fields.float(&["volume", "breath_volume"])?,
        temp: fields.float(&["temp"])?,
        heart_rate: fields.signed(&["heart_rate"])?,
        hr_valid: fields.flag(&["hr_valid"])?,
        spo2: fields.signed(&["spo2"])?,
        spo2_valid: fields.flag(&["spo2_valid"])?,
        exercise_active: fields.flag(&["exercise_active"])?,
        time_remaining: fields.unsigned(&["time_remaining"])?,
        breath_count: fields.unsigned(&["breath_count"])?,
        timestamp: fields.unsigned(&["timestamp"])?,
    })
}

fn decode_summary(fields: &Fields<'_>) -> Result<Summary, DecodeError> {
    Ok(Summary {
        avg_inhaled_volume: fields.float(&["avg_inhaled_volume", "avg_volume"])?,
        total_breaths: fields.unsigned(&["total_breaths"])?,
        duration: fields.unsigned(&["duration"])?,
        final_heart_rate: fields.signed(&["final_heart_rate"])?,
        final_spo2: fields.signed(&["final_spo2"])?,
    })
}

/// Typed accessors over a payload object.
struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
    /// First alias that is present and not null.
    fn first(&self, names: &[&'static str]) -> Option<(&'static str, &'a Value)> {
        names.iter().find_map(|name| match self.0.get(*name) {
            None | Some(Value::Null) => None,
            Some(value) => Some((*name, value)),
        })
    }

    fn float(&self, names: &[&'static str]) -> Result<Option<f64>, DecodeError> {
        self.map(names, "a number", Value::as_f64)
    }

    fn unsigned(&self, names: &[&'static str]) -> Result<Option<u64>, DecodeError> {
        self.map(names, "a non-negative integer", |value| {
            value.as_u64().or_else(|| {
                value
                    .as_f64()
                    .filter(|v| *v >= 0.0 && v.fract() == 0.0 && *v < u64::MAX as f64)
                    .map(|v| v as u64)
            })
        })
    }

    fn signed(&self, names: &[&'static str]) -> Result<Option<i64>, DecodeError> {
        self.map(names, "an integer", |value| {
            value.as_i64().or_else(|| {
                value
                    .as_f64()
                    .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
                    .map(|v| v as i64)
            })
        })
    }

    fn flag(&self, names: &[&'static str]) -> Result<Option<bool>, DecodeError> {
        self.map(names, "a boolean or 0/1", |value| match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => match n.as_u64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            },
            _ => None,
        })
    }

    fn map<T>(
        &self,
        names: &[&'static str],
        expected: &'static str,
        convert: impl Fn(&Value) -> Option<T>,
    ) -> Result<Option<T>, DecodeError> {
        match self.first(names) {
            None => Ok(None),
            Some((field, value)) => convert(value)
                .map(Some)
                .ok_or(DecodeError::InvalidField { field, expected }),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render a payload for logging, truncated to [`PREVIEW_LIMIT`] bytes.
///
/// Invalid UTF-8 is replaced and truncation never splits a character.
///
/// ```rust
/// use breathwatch_types::preview;
///
/// assert_eq!(preview(b"{\"seq\":1}"), "{\"seq\":1}");
/// assert!(preview(&[b'x'; 500]).ends_with('…'));
/// ```
pub fn preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.len() <= PREVIEW_LIMIT {
        return text.into_owned();
    }

    let mut end = PREVIEW_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
