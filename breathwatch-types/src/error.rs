//! Decode and validation errors.

use thiserror::Error;

/// A payload could not be turned into a record.
///
/// The message is dropped; callers log it with the topic and a truncated
/// payload (see [`crate::preview`]).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid UTF-8 JSON.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload parsed, but its top level is not an object.
    #[error("payload is a JSON {found}, expected an object")]
    NotAnObject {
        /// JSON type that was found instead.
        found: &'static str,
    },

    /// A known field is present with an unusable value.
    #[error("field `{field}` is not {expected}")]
    InvalidField {
        /// Name of the offending field as it appeared in the payload.
        field: &'static str,
        /// Description of the accepted values.
        expected: &'static str,
    },
}

/// Which record a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A raw [`crate::Reading`].
    Reading,
    /// A session [`crate::Summary`].
    Summary,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Reading => f.write_str("reading"),
            RecordKind::Summary => f.write_str("summary"),
        }
    }
}

/// A decoded record lacks fields a sink requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// One or more required fields are absent or null.
    #[error("{record} is missing required field(s): {}", fields.join(", "))]
    MissingFields {
        /// The record being validated.
        record: RecordKind,
        /// Every missing field, in declaration order.
        fields: Vec<&'static str>,
    },
}

impl ValidationError {
    /// The fields reported missing.
    pub fn missing(&self) -> &[&'static str] {
        match self {
            ValidationError::MissingFields { fields, .. } => fields,
        }
    }
}
