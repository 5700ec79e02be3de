//! Metrics collection and exposition.
//!
//! # Metrics
//! - `exchange_connections_accepted_total` (counter)
//! - `exchange_handshake_failures_total` (counter, by role)
//! - `exchange_requests_total` (counter)
//! - `exchange_request_bytes_total` (counter)
//! - `exchange_request_duration_seconds` (histogram): read, handle, write
//! - `exchange_active_connections` (gauge)
//!
//! Recorded through the `metrics` facade; without an installed recorder the
//! calls are no-ops.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::net::Role;

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_accepted() {
    counter!("exchange_connections_accepted_total").increment(1);
}

pub fn record_handshake_failure(role: Role) {
    counter!("exchange_handshake_failures_total", "role" => role.to_string()).increment(1);
}

pub fn record_request(request_bytes: usize) {
    counter!("exchange_requests_total").increment(1);
    counter!("exchange_request_bytes_total").increment(request_bytes as u64);
}

pub fn record_request_duration(elapsed: Duration) {
    histogram!("exchange_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn set_active_connections(count: usize) {
    gauge!("exchange_active_connections").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_connection_accepted();
        record_handshake_failure(Role::Server);
        record_request(12);
        record_request_duration(Duration::from_millis(3));
        set_active_connections(0);
    }
}
