use crate::buffer::BufferStore;
use crate::codec::round3;
use crate::log::TelemetryLog;
use crate::sink::FlushSink;
use chrono::{DateTime, Utc};
use ecowatt_types::{
    record::NOMINAL_SAMPLE_WIDTH, AveragedSample, BenchmarkRecord, CompressionRatio,
    FlushPayload, UploadRecord,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Inactivity-debounce aggregator.
///
/// A single background task wakes on a fixed tick, snapshots the buffer
/// store and flushes every device that holds data and has been quiet for
/// the full debounce interval. The debounce clock is reset by any ingest,
/// so a bursty device produces exactly one aggregated record per burst,
/// however long the burst lasts.
pub struct Flusher {
    store: Arc<BufferStore>,
    log: Arc<TelemetryLog>,
    sink: Arc<dyn FlushSink>,
    debounce_secs: u64,
    tick_secs: u64,
}

impl Flusher {
    pub fn new(
        store: Arc<BufferStore>,
        log: Arc<TelemetryLog>,
        sink: Arc<dyn FlushSink>,
        debounce_secs: u64,
        tick_secs: u64,
    ) -> Self {
        Self {
            store,
            log,
            sink,
            debounce_secs,
            tick_secs,
        }
    }

    /// Aggregation method label recorded in every benchmark.
    pub fn method(&self) -> String {
        format!("delta-avg-{}s-inactivity", self.debounce_secs)
    }

    /// Spawn the tick loop. Runs until process shutdown; there is no
    /// cancellation path.
    pub fn start(self: Arc<Self>) {
        info!(
            debounce_secs = self.debounce_secs,
            tick_secs = self.tick_secs,
            sink = self.sink.name(),
            "Flusher started"
        );

        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(self.tick_secs));
            loop {
                tick.tick().await;
                self.scan_once(Utc::now()).await;
            }
        });
    }

    /// One scan pass: evaluate every device independently. A failure for
    /// one device must not keep the others from being flushed.
    pub async fn scan_once(&self, now: DateTime<Utc>) {
        let due = self.store.due_devices(now, self.debounce_secs).await;

        for device_id in due {
            self.flush_device(&device_id, now).await;
        }
    }

    /// Flush one device: take its buffer under the store lock, then
    /// append records and notify the sink with the lock released. The
    /// flush is irreversible once the records are appended; a sink
    /// failure is logged and swallowed.
    pub async fn flush_device(&self, device_id: &str, now: DateTime<Utc>) {
        let Some((reg_values, received_bytes)) =
            self.store.take_for_flush(device_id, now).await
        else {
            // Raced with an ingest-free reset or an empty buffer.
            debug!(device_id = %device_id, "Nothing to flush");
            return;
        };

        let (upload, benchmark, payload) =
            build_flush(device_id, &reg_values, received_bytes, now, self.method());

        info!(
            device_id = %device_id,
            registers = upload.samples.len(),
            bytes = received_bytes,
            "Device buffer flushed"
        );

        self.log.append(upload, benchmark).await;

        if let Err(e) = self.sink.push(&payload).await {
            error!(
                device_id = %device_id,
                sink = self.sink.name(),
                error = %e,
                "Flush push failed; record kept, not retried"
            );
        }
    }
}

/// Compute one flush's records from a taken buffer.
///
/// Registers are iterated in ascending address order; each contributes
/// the arithmetic mean of its raw values, rounded to 3 decimals, stamped
/// with the flush time. The benchmark statistics run over the flat
/// concatenation of all raw values.
pub fn build_flush(
    device_id: &str,
    reg_values: &BTreeMap<u8, Vec<f64>>,
    received_bytes: u64,
    flush_time: DateTime<Utc>,
    method: String,
) -> (UploadRecord, BenchmarkRecord, FlushPayload) {
    let mut samples = Vec::new();
    let mut flat = Vec::new();

    for (&reg_addr, values) in reg_values {
        if values.is_empty() {
            continue;
        }
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        flat.extend_from_slice(values);
        samples.push(AveragedSample {
            timestamp: flush_time.timestamp(),
            reg_addr,
            value: round3(avg),
        });
    }

    let num_samples = samples.len();
    let original_size = num_samples as u64 * NOMINAL_SAMPLE_WIDTH;
    let compression_ratio = if received_bytes > 0 {
        CompressionRatio::Ratio(round2(original_size as f64 / received_bytes as f64))
    } else {
        CompressionRatio::NotApplicable
    };

    let min = flat.iter().copied().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |a| a.min(v)))
    });
    let max = flat.iter().copied().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |a| a.max(v)))
    });
    let avg = if flat.is_empty() {
        None
    } else {
        Some(round2(flat.iter().sum::<f64>() / flat.len() as f64))
    };

    let benchmark = BenchmarkRecord {
        method,
        num_samples,
        original_size,
        compressed_size: received_bytes,
        compression_ratio,
        lossless_verified: false,
        cpu_time_ms: None,
        min,
        avg,
        max,
    };

    let upload = UploadRecord {
        timestamp: flush_time,
        device_id: device_id.to_string(),
        bytes: received_bytes,
        samples: samples.clone(),
    };

    let payload = FlushPayload {
        device_id: device_id.to_string(),
        timestamp: flush_time,
        benchmark: benchmark.clone(),
        samples: samples.iter().map(|s| s.value).collect(),
    };

    (upload, benchmark, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::Mutex;

    struct RecordingSink {
        payloads: Mutex<Vec<FlushPayload>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                payloads: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FlushSink for RecordingSink {
        async fn push(&self, payload: &FlushPayload) -> anyhow::Result<()> {
            self.payloads.lock().await.push(payload.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct FailingSink;

    #[async_trait]
    impl FlushSink for FailingSink {
        async fn push(&self, _payload: &FlushPayload) -> anyhow::Result<()> {
            anyhow::bail!("aggregator down")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn sample_bytes(reg_addr: u8, value: f32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        buf.push(reg_addr);
        buf.extend_from_slice(&value.to_le_bytes());
        buf
    }

    fn flusher_with_sink(
        sink: Arc<dyn FlushSink>,
    ) -> (Arc<BufferStore>, Arc<TelemetryLog>, Flusher) {
        let store = Arc::new(BufferStore::new());
        let log = Arc::new(TelemetryLog::new());
        let flusher = Flusher::new(store.clone(), log.clone(), sink, 15, 1);
        (store, log, flusher)
    }

    #[test]
    fn averaging_per_register() {
        let mut reg_values = BTreeMap::new();
        reg_values.insert(5u8, vec![10.0, 20.0, 30.0]);

        let now = Utc::now();
        let (upload, benchmark, payload) =
            build_flush("dev-1", &reg_values, 27, now, "m".to_string());

        assert_eq!(upload.samples.len(), 1);
        assert_eq!(upload.samples[0].reg_addr, 5);
        assert_eq!(upload.samples[0].value, 20.0);
        assert_eq!(upload.samples[0].timestamp, now.timestamp());
        assert_eq!(payload.samples, vec![20.0]);

        assert_eq!(benchmark.num_samples, 1);
        assert_eq!(benchmark.original_size, 12);
        assert_eq!(benchmark.compressed_size, 27);
        assert_eq!(benchmark.compression_ratio, CompressionRatio::Ratio(0.44));
        assert_eq!(benchmark.min, Some(10.0));
        assert_eq!(benchmark.avg, Some(20.0));
        assert_eq!(benchmark.max, Some(30.0));
        assert!(!benchmark.lossless_verified);
        assert_eq!(benchmark.cpu_time_ms, None);
    }

    #[test]
    fn registers_come_out_in_ascending_order() {
        let mut reg_values = BTreeMap::new();
        reg_values.insert(9u8, vec![9.0]);
        reg_values.insert(1u8, vec![1.0]);
        reg_values.insert(4u8, vec![4.0]);

        let (upload, _, _) =
            build_flush("dev-1", &reg_values, 27, Utc::now(), "m".to_string());

        let order: Vec<u8> = upload.samples.iter().map(|s| s.reg_addr).collect();
        assert_eq!(order, vec![1, 4, 9]);
    }

    #[test]
    fn zero_bytes_yields_na_ratio() {
        let mut reg_values = BTreeMap::new();
        reg_values.insert(0u8, vec![1.0]);

        let (_, benchmark, _) =
            build_flush("dev-1", &reg_values, 0, Utc::now(), "m".to_string());
        assert_eq!(benchmark.compression_ratio, CompressionRatio::NotApplicable);
    }

    #[test]
    fn empty_register_sequences_are_skipped() {
        let mut reg_values = BTreeMap::new();
        reg_values.insert(1u8, Vec::new());
        reg_values.insert(2u8, vec![5.0]);

        let (upload, benchmark, _) =
            build_flush("dev-1", &reg_values, 9, Utc::now(), "m".to_string());
        assert_eq!(upload.samples.len(), 1);
        assert_eq!(benchmark.num_samples, 1);
    }

    #[tokio::test]
    async fn scan_flushes_quiet_devices_and_resets_buffers() {
        let sink = Arc::new(RecordingSink::new());
        let (store, log, flusher) = flusher_with_sink(sink.clone());

        let t0 = Utc::now();
        store.ingest_at("dev-1", &sample_bytes(5, 10.0), t0).await;
        store.ingest_at("dev-1", &sample_bytes(5, 20.0), t0).await;
        store.ingest_at("dev-2", &sample_bytes(3, 7.5), t0).await;

        // Not yet quiet long enough.
        flusher.scan_once(t0 + ChronoDuration::seconds(10)).await;
        assert_eq!(log.upload_count().await, 0);

        let flush_time = t0 + ChronoDuration::seconds(15);
        flusher.scan_once(flush_time).await;

        let (uploads, benchmarks) = log.snapshot().await;
        assert_eq!(uploads.len(), 2);
        assert_eq!(benchmarks.len(), 2);

        let dev1 = uploads.iter().find(|u| u.device_id == "dev-1").unwrap();
        assert_eq!(dev1.samples[0].value, 15.0);
        assert_eq!(dev1.bytes, 18);

        // Buffers reset, inactivity clock rebased to the flush instant.
        let buffer = store.get("dev-1").await.unwrap();
        assert!(!buffer.has_data());
        assert_eq!(buffer.last_seen, flush_time);

        assert_eq!(sink.payloads.lock().await.len(), 2);

        // Nothing further to flush on the next pass.
        flusher.scan_once(flush_time + ChronoDuration::seconds(30)).await;
        assert_eq!(log.upload_count().await, 2);
    }

    #[tokio::test]
    async fn sink_failure_does_not_roll_back_records() {
        let (store, log, flusher) = flusher_with_sink(Arc::new(FailingSink));

        let t0 = Utc::now();
        store.ingest_at("dev-1", &sample_bytes(5, 10.0), t0).await;
        flusher.scan_once(t0 + ChronoDuration::seconds(15)).await;

        assert_eq!(log.upload_count().await, 1);
        let buffer = store.get("dev-1").await.unwrap();
        assert!(!buffer.has_data());
    }

    #[tokio::test]
    async fn method_label_tracks_debounce_interval() {
        let (_, _, flusher) = flusher_with_sink(Arc::new(crate::sink::NullSink));
        assert_eq!(flusher.method(), "delta-avg-15s-inactivity");
    }
}
