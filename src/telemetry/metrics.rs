//! Prometheus metrics

use crate::hub::ConnectionState;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Reconnect attempts started by the retry loop
    ReconnectAttempts,
    /// Retry loops that used up every attempt
    ReconnectExhausted,
    /// Inbound events handed to the dispatcher
    EventsDelivered,
    /// Event handlers that panicked
    HandlerFailures,
}

impl CounterMetric {
    fn name(self) -> &'static str {
        match self {
            CounterMetric::ReconnectAttempts => "hublink_reconnect_attempts_total",
            CounterMetric::ReconnectExhausted => "hublink_reconnect_exhausted_total",
            CounterMetric::EventsDelivered => "hublink_events_delivered_total",
            CounterMetric::HandlerFailures => "hublink_handler_failures_total",
        }
    }
}

/// Increment a counter by one
pub fn increment_counter(metric: CounterMetric) {
    metrics::counter!(metric.name()).increment(1);
}

/// Record the current connection state
pub fn record_state(state: ConnectionState) {
    metrics::gauge!("hublink_connection_state").set(f64::from(state.code()));
    tracing::debug!(metric = "hublink_connection_state", state = %state, "Setting gauge");
}

/// Serve the Prometheus scrape endpoint on `port`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}
