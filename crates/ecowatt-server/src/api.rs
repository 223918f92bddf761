use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ecowatt_modbus::FrameError;
use ecowatt_types::BenchmarkRecord;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Device id header set by the firmware on every upload.
const DEVICE_ID_HEADER: &str = "device-id";

const UNKNOWN_DEVICE: &str = "Unknown-Device";

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/upload", post(upload))
        .route("/api/upload/meta", post(upload_meta))
        .route("/api/uploads", get(get_uploads))
        .route("/api/inverter/read", post(inverter_read))
        .route("/api/inverter/write", post(inverter_write))
        .route("/api/inverter/config", post(inverter_config))
        .with_state(state)
}

/// Binary sample upload. Accumulates into the device's debounce buffer
/// and acknowledges immediately; aggregation happens out of band.
async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Bytes,
) -> impl IntoResponse {
    let device_id = headers
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(UNKNOWN_DEVICE);

    let decoded = state.store.ingest(device_id, &payload).await;

    debug!(
        device_id = %device_id,
        payload_bytes = payload.len(),
        decoded = decoded,
        "Upload accepted"
    );

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "success",
            "received": payload.len(),
        })),
    )
}

/// Device-submitted benchmark metadata, appended to the benchmark log.
async fn upload_meta(
    State(state): State<Arc<AppState>>,
    Json(meta): Json<Value>,
) -> impl IntoResponse {
    let record: BenchmarkRecord = match serde_json::from_value(meta) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Rejected benchmark meta");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "status": "error", "error": e.to_string() })),
            );
        }
    };

    info!(
        method = %record.method,
        num_samples = record.num_samples,
        original_size = record.original_size,
        compressed_size = record.compressed_size,
        lossless = record.lossless_verified,
        "Benchmark meta received"
    );

    let body = serde_json::json!({ "status": "success", "benchmark": record });
    state.log.push_benchmark(record).await;

    (StatusCode::OK, Json(body))
}

/// Full snapshot of the flushed-upload and benchmark logs.
async fn get_uploads(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (uploads, benchmarks) = state.log.snapshot().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "uploads": uploads,
            "benchmarks": benchmarks,
        })),
    )
}

fn frame_rejection(err: FrameError) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}

fn extract_frame(body: &Value) -> Result<&str, FrameError> {
    body.get("frame")
        .and_then(|v| v.as_str())
        .ok_or(FrameError::MissingFrame)
}

async fn inverter_read(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let hex_frame = match extract_frame(&body) {
        Ok(f) => f,
        Err(e) => return frame_rejection(e),
    };

    match state.simulator.read_frame_hex(hex_frame).await {
        Ok(frame) => (StatusCode::OK, Json(serde_json::json!({ "frame": frame }))),
        Err(e) => frame_rejection(e),
    }
}

async fn inverter_write(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let hex_frame = match extract_frame(&body) {
        Ok(f) => f,
        Err(e) => return frame_rejection(e),
    };

    match state.simulator.write_echo_hex(hex_frame).await {
        Ok(frame) => (StatusCode::OK, Json(serde_json::json!({ "frame": frame }))),
        Err(e) => frame_rejection(e),
    }
}

/// Merge register values and optionally replace the exception set.
/// Malformed entries are skipped one by one, never failing the request.
async fn inverter_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let updates = body
        .get("registers")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(key, value)| {
                    let addr = key.parse::<u16>().ok()?;
                    let value = parse_register_value(value)?;
                    Some((addr, value))
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let exceptions = body.get("exceptions").and_then(|v| v.as_array()).map(|list| {
        list.iter()
            .filter_map(parse_register_addr)
            .collect::<Vec<_>>()
    });

    let (registers, exceptions) = state.simulator.configure(updates, exceptions).await;

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "registers": registers,
            "exceptions": exceptions,
        })),
    )
}

fn parse_register_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        Value::String(s) => s.parse::<u16>().ok(),
        _ => None,
    }
}

fn parse_register_addr(value: &Value) -> Option<u16> {
    parse_register_value(value)
}
