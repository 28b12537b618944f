//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "abcache_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "abcache_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "abcache_http_requests_in_flight";

    // Cache metrics
    pub const CACHE_STORE_TOTAL: &str = "abcache_cache_store_total";
    pub const CACHE_UPLOAD_DURATION_SECONDS: &str = "abcache_cache_upload_duration_seconds";
    pub const CACHE_PROBE_TOTAL: &str = "abcache_cache_probe_total";
    pub const SIGNED_URLS_TOTAL: &str = "abcache_signed_urls_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a cache store attempt.
pub fn record_cache_store(result: &str, duration_secs: f64) {
    let labels = [("result", result.to_string())];
    counter!(names::CACHE_STORE_TOTAL, &labels).increment(1);
    if result == "ok" {
        histogram!(names::CACHE_UPLOAD_DURATION_SECONDS).record(duration_secs);
    }
}

/// Record an existence probe outcome (`hit`, `miss`, or an error code).
pub fn record_cache_probe(result: &str) {
    let labels = [("result", result.to_string())];
    counter!(names::CACHE_PROBE_TOTAL, &labels).increment(1);
}

/// Record a signed URL request outcome.
pub fn record_signed_url(result: &str) {
    let labels = [("result", result.to_string())];
    counter!(names::SIGNED_URLS_TOTAL, &labels).increment(1);
}

/// Sanitize path for metrics labels (item ids become a placeholder).
fn sanitize_path(path: &str) -> String {
    let mut previous = "";
    path.split('/')
        .map(|segment| {
            let out = if previous == "items" { ":item_id" } else { segment };
            previous = segment;
            out
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/items/li_8f2c/cache/url"),
            "/api/items/:item_id/cache/url"
        );
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
