use serde::{Deserialize, Serialize};

/// One decoded telemetry sample as uploaded by a field device.
///
/// Produced only by the binary decoder; immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Device-side capture time (epoch seconds, device clock).
    pub timestamp: u32,
    /// Source register address on the device.
    pub reg_addr: u8,
    /// Register value, rounded to 3 decimals at decode time.
    pub value: f64,
}

/// One averaged register value emitted by a flush.
///
/// The timestamp is the flush instant, not any individual sample's
/// capture time; averaging collapses the device timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AveragedSample {
    pub timestamp: i64,
    pub reg_addr: u8,
    pub value: f64,
}
