//! EmbedServe - Main Entry Point
//!
//! Loads a model directory, starts its worker, and serves `/infer` and the
//! surrounding health/metrics endpoints over HTTP.

use embedserve_common::{EmbedServeConfig, MetricsRegistry};
use embedserve_core::worker::{WorkerHandle, WorkerSettings};
use embedserve_server::state::AppState;
use embedserve_server::http;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "embedserve_server=info,tower_http=info,axum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting EmbedServe");

    let model_directory = std::env::var("EMBEDSERVE_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("models/default"));

    let config_path = std::env::var("EMBEDSERVE_CONFIG").ok().map(PathBuf::from);
    let config = EmbedServeConfig::load(config_path.as_deref())?;

    info!(
        bind = %format!("{}:{}", config.service.host, config.service.port),
        model_directory = %model_directory.display(),
        "configuration loaded"
    );

    let metrics = Arc::new(MetricsRegistry::new());

    let model = embedserve_models::load_model(&model_directory)?;
    let model_name = model.info().name.clone();

    let worker = WorkerHandle::start(
        model_name,
        model,
        WorkerSettings {
            max_queue_size: config.server.max_queue_size,
            request_timeout: config.request_timeout(),
            warmup_enabled: config.models.warmup_enabled,
            default_batch_size: config.models.default_batch_size,
            default_batch_wait_s: config.models.default_batch_wait_s,
        },
        metrics.clone(),
    )
    .await?;

    let config = Arc::new(config);
    let state = AppState {
        worker: worker.clone(),
        config: config.clone(),
        metrics,
    };
    let app = http::router(state);

    let bind_addr = format!("{}:{}", config.service.host, config.service.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "listening");

    let shutdown_timeout = config.shutdown_timeout();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        signal::ctrl_c().await.ok();
        info!("shutdown signal received, draining worker");
    });

    if let Err(e) = server.await {
        error!(error = %e, "server error");
    }

    worker.shutdown(shutdown_timeout).await;
    info!("shutdown complete");
    Ok(())
}
