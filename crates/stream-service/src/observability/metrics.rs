//! Prometheus metrics for the stream service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `stream_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods
//! - `endpoint`: parameterized paths (see [`normalize_endpoint`])
//! - `status`: success, error, timeout
//! - `operation`: bounded by the repository code
//! - `actor_type`: dispatcher, signaling, storage
//! - `kind`: download, playback

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("stream_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("stream_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000, 3.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        // Ingestion is bounded by the ingest deadline (3s default)
        .set_buckets_for_metric(
            Matcher::Prefix("stream_ingest".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.000, 3.000],
        )
        .map_err(|e| format!("Failed to set ingest buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `stream_http_requests_total`, `stream_http_request_duration_seconds`
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(path);
    let status = categorize_status_code(status_code);

    histogram!("stream_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("stream_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize a request path to a bounded set of endpoint labels.
///
/// Stream names are user-chosen, so every path carrying one collapses to
/// its route template.
#[must_use]
pub fn normalize_endpoint(path: &str) -> &'static str {
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    match segments.as_slice() {
        ["", "health"] => "/health",
        ["", "ready"] => "/ready",
        ["", "metrics"] => "/metrics",
        ["", "api", "ws"] => "/api/ws",
        ["", "api", "video", "chunk"] => "/api/video/chunk",
        ["", "api", "video", "playback", _] => "/api/video/playback/{name}",
        ["", "api", "video", "meta", _] => "/api/video/meta/{name}",
        ["", "api", "video", _] => "/api/video/{name}",
        ["", "api", "streams", "active"] => "/api/streams/active",
        ["", "api", "streams", "old"] => "/api/streams/old",
        ["", "api", "streams", _] => "/api/streams/{name}",
        _ => "/other",
    }
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record a store operation.
///
/// Metric: `stream_db_query_duration_seconds`, `stream_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("stream_db_query_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("stream_db_queries_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Storage Engine Metrics
// ============================================================================

/// Record one completed ingestion call.
///
/// Metric: `stream_ingest_duration_seconds`, `stream_ingest_bytes_total`
pub fn record_ingest(status: &'static str, bytes: usize, duration: Duration) {
    histogram!("stream_ingest_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());

    if status == "success" {
        counter!("stream_ingest_bytes_total").increment(bytes as u64);
    }
}

/// Record bytes written to a download or playback response.
///
/// Metric: `stream_bytes_served_total`
pub fn record_bytes_served(kind: &'static str, bytes: usize) {
    counter!("stream_bytes_served_total", "kind" => kind).increment(bytes as u64);
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Metric: `stream_ws_connections_active`
#[allow(clippy::cast_precision_loss)]
pub fn set_connections_active(count: usize) {
    gauge!("stream_ws_connections_active").set(count as f64);
}

/// Metric: `stream_participants_active`
#[allow(clippy::cast_precision_loss)]
pub fn set_participants_active(count: usize) {
    gauge!("stream_participants_active").set(count as f64);
}

/// Metric: `stream_mailbox_depth`
#[allow(clippy::cast_precision_loss)]
pub fn set_mailbox_depth(actor_type: &'static str, depth: usize) {
    gauge!("stream_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// Metric: `stream_messages_dropped_total`
pub fn record_message_dropped(actor_type: &'static str) {
    counter!("stream_messages_dropped_total", "actor_type" => actor_type).increment(1);
}
