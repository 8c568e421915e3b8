//! EmbedServe batch - offline inference over parquet shards.

use embedserve_common::{EmbedServeConfig, MetricsRegistry};
use embedserve_core::worker::{WorkerHandle, WorkerSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "embedserve_batch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let model_directory = PathBuf::from(
        args.next()
            .unwrap_or_else(|| panic!("usage: embedserve-batch <model_dir> <input_dir> <output_dir>")),
    );
    let input_dir = args
        .next()
        .unwrap_or_else(|| panic!("usage: embedserve-batch <model_dir> <input_dir> <output_dir>"));
    let output_dir = args
        .next()
        .unwrap_or_else(|| panic!("usage: embedserve-batch <model_dir> <input_dir> <output_dir>"));

    let config_path = std::env::var("EMBEDSERVE_CONFIG").ok().map(PathBuf::from);
    let config = EmbedServeConfig::load(config_path.as_deref())?;
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

    let summary = embedserve_batch::run(&input_dir, &output_dir, worker.clone(), metrics).await?;
    info!(
        shards = summary.shards_processed,
        samples = summary.samples_processed,
        failed = summary.samples_failed,
        "batch pipeline complete"
    );

    worker.shutdown(config.shutdown_timeout()).await;
    Ok(())
}
