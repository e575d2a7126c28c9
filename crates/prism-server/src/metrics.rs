//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across crates.

/// Registered stream nodes (gauge).
pub const NODES_REGISTERED: &str = "mm_nodes_registered";
/// Queued sessions (gauge).
pub const QUEUE_DEPTH: &str = "mm_queue_depth";
/// Assignments made (counter).
pub const ASSIGNMENTS_TOTAL: &str = "mm_assignments_total";
/// Stale nodes removed by the sweep (counter).
pub const STALE_NODES_SWEPT_TOTAL: &str = "mm_stale_nodes_swept_total";
/// Sessions expired by the sweep (counter).
pub const SESSIONS_EXPIRED_TOTAL: &str = "mm_sessions_expired_total";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Broadcast messages dropped on full client channels (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
