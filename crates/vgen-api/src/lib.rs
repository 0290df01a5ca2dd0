//! Axum HTTP API server.
//!
//! This crate provides:
//! - Job submission, status and listing endpoints
//! - Source image upload
//! - Rate limiting and security headers
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
