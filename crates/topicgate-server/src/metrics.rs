//! Prometheus metrics for the gateway.
//!
//! Covers HTTP traffic, authorization outcomes and credential cache state.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use topicgate_auth::{CacheStats, DenyReason};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    pub const HTTP_ACTIVE_CONNECTIONS: &str = "http_active_connections";

    // Authorization metrics
    pub const AUTH_FAILURES_TOTAL: &str = "auth_failures_total";
    pub const AUTH_DECISION_DURATION_SECONDS: &str = "auth_decision_duration_seconds";

    // Cache metrics
    pub const CACHE_REFRESHES_TOTAL: &str = "cache_refreshes_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized
/// or another recorder is installed.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// HTTP Metrics
// =============================================================================

/// Record a completed HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let normalized_path = normalize_path(path);

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => normalized_path.clone(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => normalized_path
    )
    .record(duration.as_secs_f64());
}

pub fn increment_active_connections() {
    gauge!(names::HTTP_ACTIVE_CONNECTIONS).increment(1.0);
}

pub fn decrement_active_connections() {
    gauge!(names::HTTP_ACTIVE_CONNECTIONS).decrement(1.0);
}

// =============================================================================
// Authorization Metrics
// =============================================================================

/// Record a refused request, labelled with the deny reason code.
pub fn record_auth_failure(reason: DenyReason) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason.code()).increment(1);
}

/// Record how long one engine decision took.
pub fn record_auth_decision(duration: Duration, allowed: bool) {
    let outcome = if allowed { "allow" } else { "deny" };
    histogram!(names::AUTH_DECISION_DURATION_SECONDS, "outcome" => outcome)
        .record(duration.as_secs_f64());
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Publish a snapshot of the credential cache.
pub fn record_cache_stats(stats: &CacheStats) {
    counter!(names::CACHE_REFRESHES_TOTAL).absolute(stats.refresh_count);
    gauge!(names::CACHE_ENTRIES, "kind" => "identities").set(stats.identity_count as f64);
    gauge!(names::CACHE_ENTRIES, "kind" => "roles").set(stats.role_count as f64);
}

// =============================================================================
// Helpers
// =============================================================================

/// Normalize a path to reduce label cardinality.
///
/// Segments that look like identifiers become `:id`.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|part| if is_likely_id(part) { ":id" } else { part })
        .collect::<Vec<_>>()
        .join("/")
}

/// Check if a string looks like an ID (UUID, hex digest, numeric).
fn is_likely_id(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }

    // UUID pattern (with or without dashes)
    if s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4 {
        return true;
    }
    if s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return true;
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    // Long alphanumeric with at least one digit, e.g. record ids
    s.len() > 12
        && s.chars().any(|c| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
