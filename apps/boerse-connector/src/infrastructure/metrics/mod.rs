//! Prometheus Metrics Module
//!
//! Counters and gauges for the connector's requests and stream workers.
//!
//! # Metrics Categories
//!
//! - **Requests**: HTTP requests by kind and outcome, with latency
//! - **Pagination**: Pages fetched per endpoint
//! - **Streams**: Messages received, skipped events, callback failures,
//!   disconnects and running subscriptions
//!
//! Recording is a no-op until a recorder is installed. Hosts that scrape
//! Prometheus call [`init_metrics`] once and render the returned handle.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "boerse_connector_requests_total",
        "Total API requests by kind and outcome"
    );
    describe_histogram!(
        "boerse_connector_request_duration_seconds",
        "API request latency until the response body is read"
    );
    describe_counter!(
        "boerse_connector_pages_total",
        "Total pages fetched by paginated retrievals"
    );
    describe_counter!(
        "boerse_connector_stream_messages_total",
        "Total stream payloads delivered to subscriptions"
    );
    describe_counter!(
        "boerse_connector_stream_skipped_total",
        "Total stream events skipped because the payload was not JSON"
    );
    describe_counter!(
        "boerse_connector_callback_failures_total",
        "Total subscription callback failures, panics included"
    );
    describe_counter!(
        "boerse_connector_stream_disconnects_total",
        "Total stream connections that ended without a stop request"
    );
    describe_gauge!(
        "boerse_connector_subscriptions_running",
        "Number of stream subscriptions with a live worker"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// One-shot data lookup.
    Data,
    /// Search query (GET or POST).
    Search,
    /// Event stream open.
    Stream,
    /// Salt bootstrap.
    Bootstrap,
}

impl RequestKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Search => "search",
            Self::Stream => "stream",
            Self::Bootstrap => "bootstrap",
        }
    }
}

/// Metric labels for request outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Request succeeded.
    Success,
    /// Network failure or timeout.
    Transport,
    /// Body was empty, malformed or rejected.
    Response,
    /// Site layout check failed.
    Bootstrap,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Transport => "transport",
            Self::Response => "response",
            Self::Bootstrap => "bootstrap",
        }
    }
}

/// Record a completed request.
pub fn record_request(kind: RequestKind, outcome: Outcome, duration: Duration) {
    counter!(
        "boerse_connector_requests_total",
        "kind" => kind.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "boerse_connector_request_duration_seconds",
        "kind" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record one fetched page.
pub fn record_page(endpoint: &str) {
    counter!(
        "boerse_connector_pages_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// Record a payload delivered to a subscription.
pub fn record_stream_message(endpoint: &str) {
    counter!(
        "boerse_connector_stream_messages_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// Record an event skipped because its payload did not parse.
pub fn record_stream_skipped(endpoint: &str) {
    counter!(
        "boerse_connector_stream_skipped_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// Record a callback failure.
pub fn record_callback_failure(endpoint: &str) {
    counter!(
        "boerse_connector_callback_failures_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// Record a stream that ended on its own.
pub fn record_disconnect(endpoint: &str) {
    counter!(
        "boerse_connector_stream_disconnects_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// Adjust the running subscription gauge.
pub fn adjust_running_subscriptions(delta: f64) {
    gauge!("boerse_connector_subscriptions_running").increment(delta);
}

// =============================================================================
// Tests
// =============================================================================
