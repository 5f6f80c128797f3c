//! # breathwatch
//!
//! Real-time telemetry relay for a breath-flow sensor.
//!
//! The relay subscribes to the sensor's MQTT topics, decodes each payload,
//! and hands accepted records to two independent sinks: a MySQL store and a
//! live WebSocket fan-out. A failure in one sink never affects the other,
//! and a slow viewer never holds up ingestion.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Relay                                │
//! │  ┌───────────┐    ┌────────────┐    ┌─────────────────────┐  │
//! │  │ subscribe │───▶│  dispatch  │───▶│ broadcast (viewers) │  │
//! │  │  (MQTT)   │    │ (decode +  │    └─────────────────────┘  │
//! │  └───────────┘    │  validate) │    ┌─────────────────────┐  │
//! │                   │            │───▶│ store (persistence) │  │
//! │                   └────────────┘    └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`subscribe`]**: bus connection, subscriptions, and reconnection
//!   behind the [`BusTransport`] trait
//! - **[`relay`]**: the dispatcher and the lifecycle
//!   (`Starting → Running → Draining → Stopped`)
//! - **[`store`]**: the [`RecordStore`] trait, MySQL, and the
//!   persistence sink with its retry policy
//! - **[`broadcast`]**: per-viewer bounded fan-out
//! - **[`server`]**: the WebSocket push channel, legacy table, and health
//! - Payload types and decoding live in [`breathwatch_types`]
//!
//! ## Usage
//!
//! ```bash
//! breathwatch --broker 172.20.10.3 --database-url mysql://root@localhost/sensor_data
//! ```
//!
//! ### Running the pipeline with in-memory doubles
//!
//! ```
//! use breathwatch::testing::{MemoryStore, ScriptedTransport};
//! use breathwatch::{Relay, RelayConfig, RelayState};
//!
//! # tokio_test::block_on(async {
//! let (transport, script) = ScriptedTransport::new();
//! let store = MemoryStore::shared();
//! let handle = Relay::new(RelayConfig::default(), transport, store.clone()).start(None);
//! assert_eq!(handle.state(), RelayState::Running);
//!
//! script.connect();
//! handle.shutdown().await;
//! assert!(store.is_closed());
//! # });
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod relay;
pub mod server;
pub mod stats;
pub mod store;
pub mod subscribe;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use breathwatch_types::{
    decode, Decoded, Reading, ReadingRow, Summary, SummaryRow, TopicKind, TopicMap,
};
pub use broadcast::{Broadcaster, Viewer, ViewerEvent};
pub use config::RelayConfig;
pub use error::{ConfigError, DecodeError, RelayError, StoreError, TransportError, ValidationError};
pub use relay::{Relay, RelayHandle, RelayState};
pub use stats::{Counter, RelayStats};
pub use store::{MySqlStore, PersistenceSink, RecordStore};
pub use subscribe::{BusMessage, BusTransport, MqttTransport};
