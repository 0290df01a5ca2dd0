//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the Prometheus recorder. Job pipeline metrics recorded by the
/// worker crate are exported through the same handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "vgen_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vgen_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vgen_http_requests_in_flight";
    pub const RATE_LIMIT_HITS_TOTAL: &str = "vgen_rate_limit_hits_total";
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

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Collapse ids in a path so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let mut segments = Vec::new();
    let mut previous = "";
    for segment in path.split('/') {
        let replaced = if segment.starts_with("job_") {
            ":job_id"
        } else if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            ":id"
        } else if previous == "images" || previous == "videos" {
            ":file"
        } else {
            segment
        };
        segments.push(replaced);
        previous = segment;
    }
    segments.join("/")
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
