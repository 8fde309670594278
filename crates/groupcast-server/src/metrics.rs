//! Prometheus metrics recorder and per-operation recording.

use groupcast_core::Response;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle that renders `/metrics`. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Operations handled (counter, labels: operation, outcome).
pub const OPERATIONS_TOTAL: &str = "groupcast_operations_total";
/// Failed per-recipient pushes (counter).
pub const PUSH_FAILURES_TOTAL: &str = "groupcast_push_failures_total";
/// Recipients per broadcast (histogram).
pub const BROADCAST_RECIPIENTS: &str = "groupcast_broadcast_recipients";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Frames dropped because a client's queue was full or closed (counter).
pub const WS_DROPPED_FRAMES_TOTAL: &str = "ws_dropped_frames_total";
/// Upgrades refused at the connection limit (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";

/// Record the outcome of one operation, plus fanout figures for broadcasts.
pub fn record_response(resp: &Response) {
    let outcome = if resp.success { "success" } else { "failure" };
    counter!(OPERATIONS_TOTAL, "operation" => resp.operation.clone(), "outcome" => outcome)
        .increment(1);

    if resp.operation != "broadcast" {
        return;
    }
    let Some(detail) = resp.detail.as_ref() else {
        return;
    };
    if let Some(recipients) = detail.get("recipients").and_then(serde_json::Value::as_u64) {
        #[allow(clippy::cast_precision_loss)]
        histogram!(BROADCAST_RECIPIENTS).record(recipients as f64);
    }
    if let Some(failed) = detail.get("failed").and_then(serde_json::Value::as_u64) {
        counter!(PUSH_FAILURES_TOTAL).increment(failed);
    }
}
