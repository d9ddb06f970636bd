//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names recorded across the relay crates.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Handshakes refused (counter, labels: reason).
pub const WS_HANDSHAKE_REJECTED_TOTAL: &str = "ws_handshake_rejected_total";
/// Connections attached to the hub (gauge).
pub const HUB_CONNECTIONS_ACTIVE: &str = "hub_connections_active";
/// Sessions held by the hub (gauge).
pub const HUB_SESSIONS_ACTIVE: &str = "hub_sessions_active";
/// Events fanned out (counter, labels: kind).
pub const HUB_EVENTS_ROUTED_TOTAL: &str = "hub_events_routed_total";
/// Events with no recipient (counter, labels: reason).
pub const HUB_EVENTS_DROPPED_TOTAL: &str = "hub_events_dropped_total";
/// Frames shed by backpressure (counter).
pub const HUB_FRAMES_SHED_TOTAL: &str = "hub_frames_shed_total";
/// `slow` notices sent (counter).
pub const HUB_SLOW_NOTICES_TOTAL: &str = "hub_slow_notices_total";
/// Client frames forwarded to producers (counter, labels: kind).
pub const HUB_INBOUND_FRAMES_TOTAL: &str = "hub_inbound_frames_total";
/// Malformed bus messages dropped by the hub (counter, labels: reason).
pub const HUB_MALFORMED_TOTAL: &str = "hub_malformed_total";
/// Producers currently reported down (gauge).
pub const HUB_PRODUCERS_DOWN: &str = "hub_producers_down";
/// Producer down transitions (counter).
pub const HUB_PRODUCER_DOWN_TOTAL: &str = "hub_producer_down_total";
/// Signal events ingested by the trigger engine (counter, labels: kind).
pub const TRIGGER_EVENTS_TOTAL: &str = "trigger_events_total";
/// Generation requests emitted (counter).
pub const TRIGGER_REQUESTS_TOTAL: &str = "trigger_requests_total";
/// Duplicate requests suppressed (counter).
pub const TRIGGER_SUPPRESSED_TOTAL: &str = "trigger_suppressed_total";
/// Malformed events dropped by the trigger (counter, labels: reason).
pub const TRIGGER_MALFORMED_TOTAL: &str = "trigger_malformed_total";
/// Debounce windows held per shard (gauge, labels: shard).
pub const TRIGGER_WINDOWS: &str = "trigger_windows";
/// Bus resubscriptions (counter, labels: subscriber).
pub const BUS_RECONNECTS_TOTAL: &str = "bus_reconnects_total";
/// Messages skipped by lagging subscribers (counter, labels: subscriber).
pub const BUS_LAGGED_MESSAGES_TOTAL: &str = "bus_lagged_messages_total";
/// Held publishes dropped during an outage (counter).
pub const BUS_HELD_DROPPED_TOTAL: &str = "bus_held_dropped_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // No global install, to avoid conflicts between tests.
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_HANDSHAKE_REJECTED_TOTAL,
            HUB_CONNECTIONS_ACTIVE,
            HUB_SESSIONS_ACTIVE,
            HUB_EVENTS_ROUTED_TOTAL,
            HUB_EVENTS_DROPPED_TOTAL,
            HUB_FRAMES_SHED_TOTAL,
            HUB_SLOW_NOTICES_TOTAL,
            HUB_INBOUND_FRAMES_TOTAL,
            HUB_MALFORMED_TOTAL,
            HUB_PRODUCERS_DOWN,
            HUB_PRODUCER_DOWN_TOTAL,
            TRIGGER_EVENTS_TOTAL,
            TRIGGER_REQUESTS_TOTAL,
            TRIGGER_SUPPRESSED_TOTAL,
            TRIGGER_MALFORMED_TOTAL,
            TRIGGER_WINDOWS,
            BUS_RECONNECTS_TOTAL,
            BUS_LAGGED_MESSAGES_TOTAL,
            BUS_HELD_DROPPED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name not snake_case: {name}"
            );
        }
    }
}
