//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_api::{create_router, metrics, ApiConfig, AppState};
use vgen_provider::DashScopeProvider;
use vgen_storage::{ObjectStore, S3ObjectStore};
use vgen_worker::{open_ledger, GenerationService, ServiceDeps, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // rustls 0.23+ needs an explicit provider; a second install is harmless
    let _ = rustls::crypto::ring::default_provider().install_default();

    init_tracing()?;

    info!("Starting vgen-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);
    if config.is_production() && config.cors_origins.iter().any(|o| o == "*") {
        warn!("CORS allows any origin in production; set CORS_ORIGINS");
    }

    let worker_config = WorkerConfig::from_env()?;
    worker_config
        .ensure_dirs()
        .await
        .with_context(|| format!("creating work dir {}", worker_config.work_dir.display()))?;

    let provider = DashScopeProvider::from_env().context("configuring generation provider")?;
    let retry = provider.config().retry_config();

    let object_store: Option<Arc<dyn ObjectStore>> = match S3ObjectStore::from_env() {
        Ok(store) => {
            info!(bucket = store.bucket(), "Object storage enabled");
            Some(Arc::new(store))
        }
        Err(e) => {
            warn!("Object storage unavailable, images will be sent inline: {}", e);
            None
        }
    };

    let ledger = Arc::new(open_ledger(&worker_config).await?);
    let service = GenerationService::new(ServiceDeps::new(
        worker_config,
        Arc::new(provider),
        object_store,
        retry,
        ledger,
    ));

    if !service.ffmpeg_available() {
        warn!("FFmpeg not found, multi-segment jobs will fail at concatenation");
    }

    let resumed = service.resume_incomplete().await?;
    if resumed > 0 {
        info!("Resumed {} unfinished jobs", resumed);
    }

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics()?)
    } else {
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;

    let app = create_router(AppState::new(config, service), metrics_handle);

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vgen=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
