//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup; a second install fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter, labels: variant).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: variant).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Inbound messages relayed total (counter, labels: variant).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// Per-recipient deliveries total (counter).
pub const RELAY_DELIVERIES_TOTAL: &str = "relay_deliveries_total";
/// Messages dropped on a full recipient queue (counter).
pub const RELAY_DROPS_TOTAL: &str = "relay_drops_total";
/// Inbound messages rejected as malformed (counter).
pub const RELAY_MALFORMED_TOTAL: &str = "relay_malformed_total";
/// Recipients found broken during delivery (counter).
pub const RELAY_SEND_FAILURES_TOTAL: &str = "relay_send_failures_total";
/// Connections refused before upgrade (counter, labels: status).
pub const WS_REJECTIONS_TOTAL: &str = "ws_rejections_total";
/// Rooms that currently exist (gauge).
pub const ROOMS_ACTIVE: &str = "rooms_active";
