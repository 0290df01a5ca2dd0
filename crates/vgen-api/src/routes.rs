//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;

use crate::handlers::{generate_video, get_job, health, list_jobs, ready, upload_image};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, request_context, security_headers, throttle_submissions, SubmitLimiter,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let submit_limiter = Arc::new(SubmitLimiter::new(state.config.submit_rate_limit_rps));
    let submit_routes = Router::new()
        .route("/video/generate", post(generate_video))
        .layer(middleware::from_fn_with_state(
            submit_limiter,
            throttle_submissions,
        ));

    let video_routes = Router::new()
        .route("/video/job/:job_id", get(get_job))
        .route("/video/jobs", get(list_jobs))
        .route("/video/upload-image", post(upload_image));

    let api_routes = Router::new().merge(submit_routes).merge(video_routes);

    // Staged images (inline fallback) and finished videos
    let worker_config = state.service.config();
    let media_routes = Router::new()
        .nest_service("/media/images", ServeDir::new(worker_config.images_dir()))
        .nest_service("/media/videos", ServeDir::new(worker_config.videos_dir()));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    let max_body_size = state.config.max_body_size;
    Router::new()
        .nest("/api", api_routes)
        .merge(media_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_context))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
