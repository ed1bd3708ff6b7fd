//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Ticks**: received and dropped stream ticks
//! - **Connection**: stream state and reconnects
//! - **Subscriptions**: streamed symbol count
//! - **Orders**: outcomes and end-to-end latency
//!
//! Recording functions are no-ops until [`init_metrics`] installs the
//! exporter, so tests and runs with metrics disabled pay nothing.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::domain::market::ConnectionState;
use crate::domain::trading::Side;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address of the `/metrics` HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for order latency (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl MetricsConfig {
    /// Listen on all interfaces at `port`.
    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            // 1ms to 30s
            latency_buckets: vec![
                0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
        }
    }
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Install the Prometheus recorder and start its HTTP listener.
///
/// Must be called from within a tokio runtime, at most once per process.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    register_metrics();

    tracing::info!(addr = %config.listen_addr, "Prometheus metrics exporter started");
    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "market_desk_ticks_received_total",
        "Ticks applied to the price cache"
    );
    describe_counter!(
        "market_desk_ticks_dropped_total",
        "Ticks discarded by reason"
    );
    describe_counter!(
        "market_desk_stream_reconnects_total",
        "Stream reconnections by cause"
    );
    describe_gauge!(
        "market_desk_stream_state",
        "1 for the current stream state, 0 otherwise"
    );
    describe_gauge!(
        "market_desk_subscribed_symbols",
        "Symbols subscribed on the live session"
    );
    describe_counter!("market_desk_orders_total", "Order attempts by outcome");
    describe_histogram!(
        "market_desk_order_duration_seconds",
        "Time from order request to result"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a tick never reached the price cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDropReason {
    /// Symbol or price failed validation.
    Malformed,
    /// Symbol is not subscribed on this session.
    Unsubscribed,
}

impl TickDropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

/// What triggered a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectCause {
    /// Transport failure or server close.
    Error,
    /// Tick watchdog expired.
    Watchdog,
    /// Explicit restart request.
    Forced,
}

impl ReconnectCause {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Watchdog => "watchdog",
            Self::Forced => "forced",
        }
    }
}

const ALL_STATES: [ConnectionState; 4] = [
    ConnectionState::Disconnected,
    ConnectionState::Connecting,
    ConnectionState::Subscribed,
    ConnectionState::Degraded,
];

/// Record a tick applied to the cache.
pub fn record_tick_received() {
    counter!("market_desk_ticks_received_total").increment(1);
}

/// Record a discarded tick.
pub fn record_tick_dropped(reason: TickDropReason) {
    counter!("market_desk_ticks_dropped_total", "reason" => reason.as_str()).increment(1);
}

/// Record a reconnect.
pub fn record_reconnect(cause: ReconnectCause) {
    counter!("market_desk_stream_reconnects_total", "cause" => cause.as_str()).increment(1);
}

/// Publish the current stream state.
pub fn set_connection_state(current: ConnectionState) {
    for state in ALL_STATES {
        let value = if state == current { 1.0 } else { 0.0 };
        gauge!("market_desk_stream_state", "state" => state.as_str()).set(value);
    }
}

/// Publish the number of symbols subscribed on the session.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_symbols(count: usize) {
    gauge!("market_desk_subscribed_symbols").set(count as f64);
}

/// Record the result of an order attempt.
pub fn record_order(side: Side, outcome: &'static str, duration: Duration) {
    counter!(
        "market_desk_orders_total",
        "side" => side.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("market_desk_order_duration_seconds", "side" => side.as_str())
        .record(duration.as_secs_f64());
}
