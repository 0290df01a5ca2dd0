//! API middleware: request context, submission throttling, response headers.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderName, HeaderValue, Method, Request, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tower_http::cors::{Any, CorsLayer};
use tracing::{field, info, info_span, warn, Instrument};
use uuid::Uuid;
use vgen_models::VIDEO_URL_PREFIX;

use crate::error::ApiError;
use crate::metrics;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Client ids longer than this are replaced with a generated one.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Above this many tracked clients, idle ones are evicted on the next check.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Correlation id of the current request, echoed back in `X-Request-ID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Opens the `http` span every handler runs in.
///
/// The span carries `request_id`, `method`, `path` and `job_id`. The job id is
/// filled from the path for job and video routes; handlers that create a job
/// record it themselves.
pub async fn request_context(mut request: Request<Body>, next: Next) -> Response<Body> {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let span = info_span!(
        "http",
        request_id = %request_id,
        method = %method,
        path = %path,
        job_id = field::Empty,
    );
    if let Some(job_id) = job_id_in_path(&path) {
        span.record("job_id", job_id);
    }

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }

    if !is_infrastructure_path(&path) {
        let status = response.status().as_u16();
        let duration_ms = start.elapsed().as_millis() as u64;
        span.in_scope(|| {
            if status >= 500 {
                warn!(status, duration_ms, "Request failed");
            } else {
                info!(status, duration_ms, "Request completed");
            }
        });
    }

    response
}

/// Job id addressed by a status or video path, if any.
fn job_id_in_path(path: &str) -> Option<&str> {
    if let Some(rest) = path.strip_prefix("/api/video/job/") {
        return Some(rest.trim_end_matches('/')).filter(|id| !id.is_empty() && !id.contains('/'));
    }
    path.strip_prefix(VIDEO_URL_PREFIX)
        .and_then(|file| file.strip_suffix(".mp4"))
        .filter(|id| id.starts_with("job_"))
}

/// Health checks and metric scrapes are not logged.
fn is_infrastructure_path(path: &str) -> bool {
    matches!(path, "/health" | "/ready" | "/metrics")
}

/// Per-client throttle for job submission.
///
/// Every accepted submission starts paid remote work, so clients are keyed by
/// IP and each gets its own token bucket.
pub struct SubmitLimiter {
    limiter: RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>,
    clock: DefaultClock,
}

impl SubmitLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_second(rps)),
            clock: DefaultClock::default(),
        }
    }

    /// `Err` holds how long the client has to wait.
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        if self.limiter.len() > MAX_TRACKED_CLIENTS {
            self.limiter.retain_recent();
            self.limiter.shrink_to_fit();
        }

        self.limiter
            .check_key(&client)
            .map(|_| ())
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

/// Whole seconds for `Retry-After`, never zero.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Rejects submissions over the client's quota with 429 and `Retry-After`.
pub async fn throttle_submissions(
    State(limiter): State<Arc<SubmitLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let Some(client) = client_ip(&request) else {
        return next.run(request).await;
    };

    match limiter.check(client) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            let retry_after = retry_after_secs(wait);
            warn!(client = %client, retry_after, "Submission throttled");
            metrics::record_rate_limit_hit(request.uri().path());

            let mut response = ApiError::RateLimited.into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
    }
}

/// Client IP from proxy headers, falling back to the connection.
fn client_ip(request: &Request<Body>) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            // First hop is the original client
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    header_ip("x-forwarded-for")
        .or_else(|| header_ip("x-real-ip"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip())
        })
}

/// CORS for browser clients polling job status.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let max_age = Duration::from_secs(600);

    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
            .allow_origin(Any)
            .max_age(max_age);
    }

    // tower-http rejects credentials combined with wildcard headers
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            X_REQUEST_ID,
        ])
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
            header::RETRY_AFTER,
            X_REQUEST_ID,
        ])
        .allow_credentials(true)
        .allow_origin(origins)
        .max_age(max_age)
}

/// Hardening headers on every response.
///
/// API responses are also marked `no-store`: job views change while a job runs.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response<Body> {
    const HEADERS: [(&str, &str); 5] = [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("strict-transport-security", "max-age=31536000; includeSubDomains"),
        ("referrer-policy", "strict-origin-when-cross-origin"),
        ("cross-origin-resource-policy", "same-origin"),
    ];

    let is_api = request.uri().path().starts_with("/api/");
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    for (name, value) in HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    if is_api {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Extension, Router};
    use tower::ServiceExt;

    #[test]
    fn test_submit_limiter_is_per_client() {
        let limiter = SubmitLimiter::new(1);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a).is_ok());
        let wait = limiter.check(a).unwrap_err();
        assert!(wait <= Duration::from_secs(1));
        assert!(limiter.check(b).is_ok());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(200)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(2)), 2);
        assert_eq!(retry_after_secs(Duration::from_millis(2500)), 3);
    }

    #[test]
    fn test_forwarded_for_wins() {
        let request = Request::builder()
            .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
            .header("X-Real-IP", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), Some("203.0.113.7".parse().unwrap()));

        let request = Request::builder()
            .header("X-Real-IP", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), Some("198.51.100.2".parse().unwrap()));
    }

    #[test]
    fn test_job_id_in_path() {
        let id = "job_0123456789abcdef0123456789abcdef";
        assert_eq!(job_id_in_path(&format!("/api/video/job/{}", id)), Some(id));
        assert_eq!(job_id_in_path(&format!("/media/videos/{}.mp4", id)), Some(id));
        assert_eq!(job_id_in_path("/media/videos/intro.mp4"), None);
        assert_eq!(job_id_in_path("/api/video/job/"), None);
        assert_eq!(job_id_in_path("/api/video/jobs"), None);
    }

    fn echo_router() -> Router {
        Router::new()
            .route(
                "/api/video/jobs",
                get(|Extension(id): Extension<RequestId>| async move { id.0 }),
            )
            .layer(axum::middleware::from_fn(security_headers))
            .layer(axum::middleware::from_fn(request_context))
    }

    #[tokio::test]
    async fn test_request_id_is_kept_and_echoed() {
        let request = Request::builder()
            .uri("/api/video/jobs")
            .header("X-Request-ID", "client-42")
            .body(Body::empty())
            .unwrap();
        let response = echo_router().oneshot(request).await.unwrap();

        assert_eq!(response.headers()["x-request-id"], "client-42");
        assert_eq!(response.headers()["cache-control"], "no-store");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"client-42");
    }

    #[tokio::test]
    async fn test_oversized_request_id_is_replaced() {
        let request = Request::builder()
            .uri("/api/video/jobs")
            .header("X-Request-ID", "x".repeat(MAX_REQUEST_ID_LEN + 1))
            .body(Body::empty())
            .unwrap();
        let response = echo_router().oneshot(request).await.unwrap();

        let echoed = response.headers()["x-request-id"].to_str().unwrap();
        assert!(Uuid::parse_str(echoed).is_ok());
    }
}
