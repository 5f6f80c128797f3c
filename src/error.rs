//! Error taxonomy for the relay.
//!
//! Every error except [`RelayError::FatalStartup`] is contained at the
//! component that produced it and surfaces only as a log line and a counter.
//!
//! | Error                 | Raised by            | Effect                                   |
//! |-----------------------|----------------------|------------------------------------------|
//! | [`TransportError`]    | bus transport        | reconnect with backoff                   |
//! | [`DecodeError`]       | decoder              | message dropped                          |
//! | [`ValidationError`]   | record validation    | record dropped for the affected sink     |
//! | [`StoreError`]        | persistence sink     | record dropped, store health degraded    |
//! | [`RelayError`]        | startup              | process exits with a diagnostic          |

use std::time::Duration;

use thiserror::Error;

pub use breathwatch_types::{DecodeError, ValidationError};

/// The bus connection failed or a bus operation was refused.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection to the broker was lost or could not be established.
    #[error("bus connection failed: {0}")]
    Connection(String),

    /// The client refused to issue a subscription request.
    #[error("subscribing to `{topic}` failed: {reason}")]
    Subscribe {
        /// Topic that could not be subscribed.
        topic: String,
        /// Reason reported by the client.
        reason: String,
    },

    /// The transport was shut down.
    #[error("bus transport closed")]
    Closed,
}

/// A store operation failed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store connection is lost or cannot be acquired.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A single attempt exceeded its time budget.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store rejected the statement.
    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// Whether the failure is about connectivity rather than the statement.
    ///
    /// Only transient failures degrade store health and are eligible for
    /// retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that stop the relay from starting.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The store could not be reached at boot. This is the only
    /// startup-fatal condition; the bus is allowed to come up late.
    #[error("store unreachable at startup: {0}")]
    FatalStartup(#[source] StoreError),

    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The viewer listener could not be bound.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
