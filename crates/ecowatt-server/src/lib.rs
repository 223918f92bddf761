pub mod api;
pub mod config;

pub use config::AppConfig;

use ecowatt_modbus::InverterSimulator;
use ecowatt_telemetry::{BufferStore, TelemetryLog};
use std::sync::Arc;

/// Shared state behind every request handler.
///
/// The buffer store and logs are also owned by the flusher task; the
/// simulator is owned here alone.
pub struct AppState {
    pub store: Arc<BufferStore>,
    pub log: Arc<TelemetryLog>,
    pub simulator: Arc<InverterSimulator>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            store: Arc::new(BufferStore::new()),
            log: Arc::new(TelemetryLog::new()),
            simulator: Arc::new(InverterSimulator::new()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
