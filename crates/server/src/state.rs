//! Shared state handed to every axum handler.

use embedserve_common::config::EmbedServeConfig;
use embedserve_common::metrics::MetricsRegistry;
use embedserve_core::worker::WorkerHandle;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub worker: WorkerHandle,
    pub config: Arc<EmbedServeConfig>,
    pub metrics: Arc<MetricsRegistry>,
}
