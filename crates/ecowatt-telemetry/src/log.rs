use ecowatt_types::{BenchmarkRecord, UploadRecord};
use tokio::sync::RwLock;

/// Append-only logs of flushed uploads and benchmark records.
///
/// Process-lifetime, in-memory only. The query boundary gets a full
/// snapshot each call; records are never mutated after append.
pub struct TelemetryLog {
    uploads: RwLock<Vec<UploadRecord>>,
    benchmarks: RwLock<Vec<BenchmarkRecord>>,
}

impl TelemetryLog {
    pub fn new() -> Self {
        Self {
            uploads: RwLock::new(Vec::new()),
            benchmarks: RwLock::new(Vec::new()),
        }
    }

    /// Append one flush's records. Irreversible once done.
    pub async fn append(&self, upload: UploadRecord, benchmark: BenchmarkRecord) {
        self.uploads.write().await.push(upload);
        self.benchmarks.write().await.push(benchmark);
    }

    /// Append a device-submitted benchmark record on its own.
    pub async fn push_benchmark(&self, benchmark: BenchmarkRecord) {
        self.benchmarks.write().await.push(benchmark);
    }

    /// Full snapshot of both logs.
    pub async fn snapshot(&self) -> (Vec<UploadRecord>, Vec<BenchmarkRecord>) {
        let uploads = self.uploads.read().await.clone();
        let benchmarks = self.benchmarks.read().await.clone();
        (uploads, benchmarks)
    }

    pub async fn upload_count(&self) -> usize {
        self.uploads.read().await.len()
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}
