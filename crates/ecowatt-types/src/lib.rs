pub mod record;
pub mod sample;

pub use record::{BenchmarkRecord, CompressionRatio, FlushPayload, UploadRecord};
pub use sample::{AveragedSample, Sample};
