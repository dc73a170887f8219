//! Prometheus Metrics Module
//!
//! Exposes gateway metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream**: frames received, requests sent, reconnects, session state
//! - **Cache**: mutations by kind
//! - **Downstream**: messages queued and dropped, subscribers
//! - **Selection**: number of monitored assets
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the HTTP server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let _init = INIT_LOCK.lock();
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
    // Upstream
    describe_counter!(
        "market_gateway_upstream_frames_total",
        "Frames received from the broker by frame kind"
    );
    describe_counter!(
        "market_gateway_upstream_requests_total",
        "Requests sent to the broker by event"
    );
    describe_counter!(
        "market_gateway_upstream_reconnects_total",
        "Upstream reconnection attempts"
    );
    describe_gauge!(
        "market_gateway_upstream_state",
        "Upstream session state (0 disconnected, 1 connecting, 2 authenticating, 3 live)"
    );

    // Cache
    describe_counter!(
        "market_gateway_cache_changes_total",
        "Cache mutations by kind"
    );

    // Downstream
    describe_counter!(
        "market_gateway_downstream_messages_total",
        "Messages queued for downstream subscribers by type"
    );
    describe_counter!(
        "market_gateway_downstream_dropped_total",
        "Messages dropped because a subscriber queue was full"
    );
    describe_gauge!(
        "market_gateway_subscribers",
        "Connected downstream subscribers"
    );

    // Selection
    describe_gauge!(
        "market_gateway_selected_assets",
        "Assets currently selected for monitoring"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the broker.
pub fn record_upstream_frame(kind: &'static str) {
    counter!("market_gateway_upstream_frames_total", "kind" => kind).increment(1);
}

/// Record a request sent to the broker.
pub fn record_upstream_request(event: &'static str) {
    counter!("market_gateway_upstream_requests_total", "event" => event).increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect_attempt() {
    counter!("market_gateway_upstream_reconnects_total").increment(1);
}

/// Update the upstream state gauge.
pub fn set_upstream_state(code: u8) {
    gauge!("market_gateway_upstream_state").set(f64::from(code));
}

/// Record a cache mutation.
pub fn record_cache_change(kind: &'static str) {
    counter!("market_gateway_cache_changes_total", "kind" => kind).increment(1);
}

/// Record a message queued for one subscriber.
pub fn record_downstream_message(kind: &'static str) {
    counter!("market_gateway_downstream_messages_total", "type" => kind).increment(1);
}

/// Record a message dropped for one subscriber.
pub fn record_downstream_dropped(kind: &'static str) {
    counter!("market_gateway_downstream_dropped_total", "type" => kind).increment(1);
}

/// Update the subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("market_gateway_subscribers").set(count as f64);
}

/// Update the selected asset gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_selected_assets(count: usize) {
    gauge!("market_gateway_selected_assets").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
