//! # breathwatch-types
//!
//! Record types and the payload decoder for breathing-sensor telemetry. This
//! crate is the shared vocabulary between the bus side of the relay and its
//! sinks: everything here is plain data plus pure functions, with no I/O and
//! no async runtime.
//!
//! ## Records
//!
//! - [`Reading`]: one periodic sample from the raw topic (flow, volume,
//!   temperature, pulse oximetry, exercise state)
//! - [`Summary`]: the end-of-session report from the summary topic
//!
//! Records are validated per sink. [`Reading::validate`] and
//! [`Summary::validate`] produce the rows the store accepts
//! ([`ReadingRow`], [`SummaryRow`]) or a [`ValidationError`].
//!
//! ## Example
//!
//! ```rust
//! use breathwatch_types::{decode, Decoded, TopicMap};
//!
//! let topics = TopicMap::default();
//! let payload = br#"{"seq":1,"flow":12.5,"breath_volume":450,"timestamp":1000}"#;
//!
//! match decode(&topics, "sensor/sfm3003/raw", payload).unwrap() {
//!     Decoded::Reading(reading) => {
//!         let row = reading.validate().unwrap();
//!         assert_eq!(row.breath_volume, 450.0);
//!         assert_eq!(row.timestamp, 1000);
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

mod decode;
mod error;
mod reading;
mod summary;
mod topic;

pub use decode::*;
pub use error::*;
pub use reading::*;
pub use summary::*;
pub use topic::*;
