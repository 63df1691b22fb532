//! Prometheus metrics endpoint.

use crate::server::SyncRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<SyncRelay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay),
    )
}

fn render(relay: &SyncRelay) -> String {
    let m = relay.metrics();

    let gauges = [
        (
            "sync_relay_connections_active",
            "Number of open WebSocket connections",
            relay.total_connections() as u64,
        ),
        (
            "sync_relay_rooms_active",
            "Number of rooms with at least one member",
            relay.total_rooms() as u64,
        ),
    ];
    let counters = [
        (
            "sync_relay_connections_total",
            "Total connections accepted",
            &m.connections_total,
        ),
        (
            "sync_relay_frames_received_total",
            "Total text frames received",
            &m.frames_received,
        ),
        (
            "sync_relay_messages_relayed_total",
            "Total messages forwarded to a room",
            &m.messages_relayed,
        ),
        (
            "sync_relay_deliveries_total",
            "Total frames delivered to room members",
            &m.deliveries_total,
        ),
        (
            "sync_relay_rooms_created_total",
            "Total rooms created",
            &m.rooms_created,
        ),
        (
            "sync_relay_rooms_expired_total",
            "Total rooms deleted after inactivity",
            &m.rooms_expired,
        ),
        (
            "sync_relay_heartbeat_timeouts_total",
            "Total connections terminated for missing a heartbeat",
            &m.heartbeat_timeouts,
        ),
        (
            "sync_relay_errors_total",
            "Total protocol errors",
            &m.errors_total,
        ),
        (
            "sync_relay_slow_consumers_dropped_total",
            "Total connections dropped for a full outbox",
            &m.slow_consumers_dropped,
        ),
    ];

    let mut body = String::new();
    // Writing to a String cannot fail.
    for (name, help, value) in gauges {
        let _ = writeln!(body, "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n");
    }
    let _ = writeln!(
        body,
        "# HELP sync_relay_info Server information\n# TYPE sync_relay_info gauge\nsync_relay_info{{version=\"{}\"}} 1\n",
        env!("CARGO_PKG_VERSION")
    );
    for (name, help, counter) in counters {
        let value = counter.load(Ordering::Relaxed);
        let _ = writeln!(body, "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::sync::mpsc;

    #[test]
    fn gauges_reflect_live_state() {
        let relay = SyncRelay::new(Config::default());
        let (tx, _rx) = mpsc::channel(16);
        relay.register(tx);

        let body = render(&relay);
        assert!(body.contains("# TYPE sync_relay_connections_active gauge"));
        assert!(body.contains("sync_relay_connections_active 1\n"));
        assert!(body.contains("sync_relay_rooms_active 0\n"));
        assert!(body.contains("sync_relay_connections_total 1\n"));
    }

    #[test]
    fn error_counter_is_exported() {
        let relay = SyncRelay::new(Config::default());
        let (tx, _rx) = mpsc::channel(16);
        let conn = relay.register(tx);
        let _ = relay.handle_frame(conn, "{");

        let body = render(&relay);
        assert!(body.contains("# TYPE sync_relay_errors_total counter"));
        assert!(body.contains("sync_relay_errors_total 1\n"));
        assert!(body.contains("sync_relay_slow_consumers_dropped_total 0\n"));
    }
}
