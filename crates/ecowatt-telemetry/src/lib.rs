//! Ingestion side of the EcoWatt mock cloud.
//!
//! Raw device uploads are decoded into register samples and accumulated
//! per device; a background task aggregates each device's buffer into one
//! averaged record after a window of inactivity and hands it to the
//! downstream sink.

pub mod buffer;
pub mod codec;
pub mod flusher;
pub mod log;
pub mod sink;

pub use buffer::{BufferStore, DeviceBuffer};
pub use codec::decode_samples;
pub use flusher::Flusher;
pub use log::TelemetryLog;
pub use sink::{FlushSink, HttpSink, NullSink};
