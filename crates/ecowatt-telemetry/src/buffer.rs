use crate::codec;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

/// Accumulated, not-yet-flushed state for one device.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    /// Raw values per register, in arrival order, across uploads.
    pub reg_values: BTreeMap<u8, Vec<f64>>,
    /// Sum of raw payload sizes since the last flush.
    pub received_bytes: u64,
    /// Time of the last accepted upload; the debounce clock.
    pub last_seen: DateTime<Utc>,
}

impl DeviceBuffer {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            reg_values: BTreeMap::new(),
            received_bytes: 0,
            last_seen: now,
        }
    }

    /// A buffer with no values in any register is empty and must not
    /// flush, even though zero-sample uploads may refresh `last_seen`.
    pub fn has_data(&self) -> bool {
        self.reg_values.values().any(|values| !values.is_empty())
    }
}

/// All device buffers behind one store-wide lock.
///
/// Ingest-append, flush-scan and flush-reset all go through this single
/// mutual-exclusion scope, so a flush and a concurrent ingest for the
/// same device never interleave. Buffers are created lazily on first
/// upload and live for the process lifetime; a flush resets a buffer but
/// never removes it.
pub struct BufferStore {
    buffers: Mutex<HashMap<String, DeviceBuffer>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Accept one upload: decode, append, bump the byte counter, reset
    /// the inactivity clock. Returns the decoded sample count. Never
    /// blocks beyond the store lock; the acknowledgment to the uploader
    /// is immediate.
    pub async fn ingest(&self, device_id: &str, payload: &[u8]) -> usize {
        self.ingest_at(device_id, payload, Utc::now()).await
    }

    /// [`ingest`](Self::ingest) with an explicit clock, for deterministic
    /// debounce tests.
    pub async fn ingest_at(
        &self,
        device_id: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> usize {
        let samples = codec::decode_samples(payload);
        let decoded = samples.len();

        let mut buffers = self.buffers.lock().await;
        let buffer = buffers
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceBuffer::new(now));

        for sample in samples {
            buffer
                .reg_values
                .entry(sample.reg_addr)
                .or_default()
                .push(sample.value);
        }
        buffer.received_bytes += payload.len() as u64;
        buffer.last_seen = now;

        debug!(
            device_id = %device_id,
            payload_bytes = payload.len(),
            decoded = decoded,
            "Upload accumulated"
        );

        decoded
    }

    /// Snapshot the ids of devices that hold data and have been quiet for
    /// at least `debounce_secs`. Holds the lock only for the copy; each
    /// flush decision re-acquires it individually.
    pub async fn due_devices(&self, now: DateTime<Utc>, debounce_secs: u64) -> Vec<String> {
        let buffers = self.buffers.lock().await;
        buffers
            .iter()
            .filter(|(_, buffer)| {
                buffer.has_data()
                    && (now - buffer.last_seen).num_seconds() >= debounce_secs as i64
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Atomically take a device's accumulated data and restart its
    /// inactivity window at `now`.
    ///
    /// An empty-but-touched buffer (the false-positive guard) is reset to
    /// zero counters with `last_seen` preserved, and yields `None`.
    pub async fn take_for_flush(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Option<(BTreeMap<u8, Vec<f64>>, u64)> {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers.get_mut(device_id)?;

        if !buffer.has_data() {
            let last_seen = buffer.last_seen;
            *buffer = DeviceBuffer::new(last_seen);
            return None;
        }

        let taken = std::mem::replace(buffer, DeviceBuffer::new(now));
        Some((taken.reg_values, taken.received_bytes))
    }

    /// Number of devices seen so far (flushed or not).
    pub async fn device_count(&self) -> usize {
        self.buffers.lock().await.len()
    }

    /// Clone of one device's buffer, for inspection in tests.
    pub async fn get(&self, device_id: &str) -> Option<DeviceBuffer> {
        self.buffers.lock().await.get(device_id).cloned()
    }
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new()
    }
}
