use crate::sample::AveragedSample;
use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Nominal bytes per sample before compression (3 sub-fields x 4 bytes).
pub const NOMINAL_SAMPLE_WIDTH: u64 = 12;

/// One aggregated record per device per quiet period. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Flush time.
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    /// Raw payload bytes received since the previous flush.
    pub bytes: u64,
    /// Averaged values in ascending register order.
    pub samples: Vec<AveragedSample>,
}

/// Original/compressed size ratio, or `N/A` when nothing was received.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompressionRatio {
    Ratio(f64),
    NotApplicable,
}

impl Serialize for CompressionRatio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CompressionRatio::Ratio(r) => serializer.serialize_f64(*r),
            CompressionRatio::NotApplicable => serializer.serialize_str("N/A"),
        }
    }
}

impl<'de> Deserialize<'de> for CompressionRatio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RatioVisitor;

        impl<'de> Visitor<'de> for RatioVisitor {
            type Value = CompressionRatio;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a number or the string \"N/A\"")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(CompressionRatio::Ratio(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(CompressionRatio::Ratio(v as f64))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(CompressionRatio::Ratio(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == "N/A" {
                    Ok(CompressionRatio::NotApplicable)
                } else {
                    Err(de::Error::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(RatioVisitor)
    }
}

/// Derived statistics for one flush. Append-only.
///
/// Devices submit their own records on the meta endpoint with the
/// firmware's key names; the aliases and defaults below accept both
/// shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    /// Aggregation method label, e.g. `delta-avg-15s-inactivity`.
    #[serde(alias = "compression_method", default = "unknown_method")]
    pub method: String,
    /// Number of registers that contributed data to this flush.
    #[serde(default)]
    pub num_samples: usize,
    /// `num_samples * NOMINAL_SAMPLE_WIDTH`.
    #[serde(default)]
    pub original_size: u64,
    /// Raw bytes actually received over the accumulation window.
    #[serde(default)]
    pub compressed_size: u64,
    #[serde(default = "ratio_not_applicable")]
    pub compression_ratio: CompressionRatio,
    /// Always false on the cloud side: aggregation is lossy by construction.
    #[serde(alias = "lossless", default)]
    pub lossless_verified: bool,
    /// Unset on the cloud side; devices report their own in meta uploads.
    #[serde(default)]
    pub cpu_time_ms: Option<f64>,
    /// Min over the flat raw (pre-averaging) values of this flush.
    #[serde(default)]
    pub min: Option<f64>,
    /// Mean over the flat raw values, rounded to 2 decimals.
    #[serde(default)]
    pub avg: Option<f64>,
    /// Max over the flat raw values.
    #[serde(default)]
    pub max: Option<f64>,
}

fn unknown_method() -> String {
    "unknown".to_string()
}

fn ratio_not_applicable() -> CompressionRatio {
    CompressionRatio::NotApplicable
}

/// Payload handed to the downstream aggregator sink after a flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushPayload {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub benchmark: BenchmarkRecord,
    /// Averaged values only, ascending register order.
    pub samples: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_serializes_as_number() {
        let v = serde_json::to_value(CompressionRatio::Ratio(2.4)).unwrap();
        assert_eq!(v, serde_json::json!(2.4));
    }

    #[test]
    fn not_applicable_serializes_as_sentinel() {
        let v = serde_json::to_value(CompressionRatio::NotApplicable).unwrap();
        assert_eq!(v, serde_json::json!("N/A"));
    }

    #[test]
    fn benchmark_accepts_firmware_key_names() {
        let meta = serde_json::json!({
            "compression_method": "delta-rle",
            "num_samples": 4,
            "original_size": 48,
            "compressed_size": 20,
            "compression_ratio": 2.4,
            "lossless": true,
            "cpu_time_ms": 1.5,
            "min": 1.0,
            "avg": 2.0,
            "max": 3.0
        });

        let record: BenchmarkRecord = serde_json::from_value(meta).unwrap();
        assert_eq!(record.method, "delta-rle");
        assert!(record.lossless_verified);
        assert_eq!(record.compression_ratio, CompressionRatio::Ratio(2.4));
    }

    #[test]
    fn benchmark_fills_defaults_for_sparse_meta() {
        let record: BenchmarkRecord = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(record.method, "unknown");
        assert_eq!(record.num_samples, 0);
        assert_eq!(record.compression_ratio, CompressionRatio::NotApplicable);
        assert_eq!(record.min, None);
    }

    #[test]
    fn ratio_round_trips() {
        let r: CompressionRatio = serde_json::from_str("1.5").unwrap();
        assert_eq!(r, CompressionRatio::Ratio(1.5));

        let na: CompressionRatio = serde_json::from_str("\"N/A\"").unwrap();
        assert_eq!(na, CompressionRatio::NotApplicable);
    }
}
