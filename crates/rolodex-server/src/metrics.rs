//! Prometheus metrics for the Rolodex server.
//!
//! - HTTP request metrics (count, latency)
//! - Cache metrics (hits and misses per entity kind, backend errors, outages)
//! - Authorization decisions, audit writes and rate-limited requests

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_BACKEND_ERRORS_TOTAL: &str = "cache_backend_errors_total";
    pub const CACHE_DISABLED_TRANSITIONS_TOTAL: &str = "cache_disabled_transitions_total";

    // Access metrics
    pub const AUTHZ_DECISIONS_TOTAL: &str = "authz_decisions_total";
    pub const AUDIT_WRITES_TOTAL: &str = "audit_writes_total";
    pub const RATE_LIMITED_REQUESTS_TOTAL: &str = "rate_limited_requests_total";
}

/// Install the Prometheus recorder. Returns `false` if it was already
/// installed or installation failed.
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

/// Render all metrics in Prometheus text format, or `None` before
/// [`init_metrics`].
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// HTTP Metrics
// =============================================================================

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Cache Metrics
// =============================================================================

pub fn record_cache_hit(kind: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "kind" => kind).increment(1);
}

pub fn record_cache_miss(kind: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "kind" => kind).increment(1);
}

/// A store call that failed or timed out.
pub fn record_backend_error(op: &'static str) {
    counter!(names::CACHE_BACKEND_ERRORS_TOTAL, "op" => op).increment(1);
}

pub fn record_backend_disabled() {
    counter!(names::CACHE_DISABLED_TRANSITIONS_TOTAL).increment(1);
}

// =============================================================================
// Access Metrics
// =============================================================================

/// `source` is where the role came from: `cache` or `store`.
pub fn record_authz_decision(source: &'static str, allowed: bool) {
    counter!(
        names::AUTHZ_DECISIONS_TOTAL,
        "source" => source,
        "allowed" => if allowed { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_audit_write(ok: bool) {
    let outcome = if ok { "ok" } else { "failed" };
    counter!(names::AUDIT_WRITES_TOTAL, "outcome" => outcome).increment(1);
}

/// A request rejected by a rate limit. `route` is the matched template.
pub fn record_rate_limited(route: &str) {
    counter!(names::RATE_LIMITED_REQUESTS_TOTAL, "route" => route.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_cache_hit("user");
        record_cache_miss("contacts");
        record_backend_error("get");
        record_authz_decision("cache", true);
        record_audit_write(false);
    }
}
