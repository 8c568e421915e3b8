//! Worker facade: owns a loaded model, its queue, and the scheduler task
//! driving it. `WorkerHandle` is the cheap, cloneable object the HTTP and
//! batch-pipeline front ends hold on to.

use crate::model::{resolve_batch_params, EmbeddingModel, ModelInfo};
use crate::queue::{QueueMetricsSnapshot, RequestQueue};
use crate::request::{Payload, Request, Response};
use crate::scheduler;
use embedserve_common::error::{EmbedServeError, Result};
use embedserve_common::metrics::MetricsRegistry;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Lifecycle of a worker. `Failed` is terminal and reachable only from
/// `Loading`/`Warming`; `Stopped` is terminal and reachable only through
/// `Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Uninitialised,
    Loading,
    Warming,
    Ready,
    Draining,
    Stopped,
    Failed,
}

/// Tunables the worker needs that don't belong to any one model.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub max_queue_size: usize,
    pub request_timeout: Duration,
    pub warmup_enabled: bool,
    pub default_batch_size: usize,
    pub default_batch_wait_s: f64,
}

struct WorkerInner {
    info: ModelInfo,
    queue: Arc<RequestQueue>,
    request_timeout: Duration,
    phase: Arc<RwLock<WorkerPhase>>,
    metrics: Arc<MetricsRegistry>,
    scheduler_stop: Arc<AtomicBool>,
    scheduler_task: RwLock<Option<JoinHandle<()>>>,
}

/// Cheap, cloneable handle to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<WorkerInner>,
}

impl WorkerHandle {
    /// Load, optionally warm up, and start serving a model. Returns once
    /// the worker is `Ready` (or an error if load/warmup failed, in which
    /// case the worker is left `Failed`).
    pub async fn start(
        model_name: impl Into<String>,
        mut model: Box<dyn EmbeddingModel>,
        settings: WorkerSettings,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        let model_name = model_name.into();
        let phase = Arc::new(RwLock::new(WorkerPhase::Loading));

        let load_start = Instant::now();
        if let Err(e) = model.load() {
            *phase.write() = WorkerPhase::Failed;
            warn!(model = %model_name, error = %e, "model load failed");
            return Err(e);
        }
        metrics.record_model_load(&model_name, load_start.elapsed().as_secs_f64());

        if settings.warmup_enabled {
            *phase.write() = WorkerPhase::Warming;
            let warmup_start = Instant::now();
            if let Err(e) = model.warmup() {
                *phase.write() = WorkerPhase::Failed;
                warn!(model = %model_name, error = %e, "model warmup failed");
                return Err(e);
            }
            metrics.record_model_warmup(&model_name, warmup_start.elapsed().as_secs_f64());
        }

        let (batch_size, batch_wait) = resolve_batch_params(
            model.as_ref(),
            settings.default_batch_size,
            settings.default_batch_wait_s,
        );
        let info = model.info();
        let queue = Arc::new(RequestQueue::new(settings.max_queue_size));
        let scheduler_stop = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(scheduler::run(
            model_name.clone(),
            model,
            queue.clone(),
            batch_size,
            batch_wait,
            metrics.clone(),
            scheduler_stop.clone(),
            phase.clone(),
        ));

        *phase.write() = WorkerPhase::Ready;
        info!(model = %model_name, batch_size, ?batch_wait, "worker ready");

        Ok(Self {
            inner: Arc::new(WorkerInner {
                info,
                queue,
                request_timeout: settings.request_timeout,
                phase,
                metrics,
                scheduler_stop,
                scheduler_task: RwLock::new(Some(task)),
            }),
        })
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.inner.phase.read()
    }

    pub fn model_info(&self) -> &ModelInfo {
        &self.inner.info
    }

    pub fn queue_metrics(&self) -> QueueMetricsSnapshot {
        self.inner.queue.metrics()
    }

    /// Admit a request and wait for its result, bounded by the worker's
    /// configured request timeout. Rejects immediately if the worker isn't
    /// `Ready` (e.g. still loading, or draining for shutdown).
    pub async fn submit(&self, payload: Payload, metadata: serde_json::Value) -> Result<Response> {
        if self.phase() != WorkerPhase::Ready {
            return Err(EmbedServeError::shutdown(
                "worker is not currently accepting requests",
            ));
        }

        let (request, rx) = Request::new(payload, metadata);
        if let Err(e) = self.inner.queue.admit(request) {
            self.inner.metrics.record_queue_rejection(&self.inner.info.name);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EmbedServeError::shutdown(
                "worker stopped before the request completed",
            )),
            Err(_) => {
                self.inner
                    .metrics
                    .requests_total
                    .with_label_values(&[self.inner.info.name.as_str(), "timeout"])
                    .inc();
                self.inner.metrics.record_error(&self.inner.info.name, "timeout");
                Err(EmbedServeError::timeout(
                    "request timed out waiting for a batch slot",
                ))
            }
        }
    }

    /// Stop accepting new requests, let the scheduler drain what's already
    /// queued (up to `deadline`), then fail anything still queued and tear
    /// down the scheduler task.
    pub async fn shutdown(&self, deadline: Duration) {
        *self.inner.phase.write() = WorkerPhase::Draining;
        self.inner.queue.start_draining();

        let start = Instant::now();
        while !self.inner.queue.is_empty() && start.elapsed() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.inner.scheduler_stop.store(true, Ordering::Release);
        let task = self.inner.scheduler_task.write().take();
        if let Some(task) = task {
            if tokio::time::timeout(Duration::from_millis(500), task)
                .await
                .is_err()
            {
                warn!(model = %self.inner.info.name, "scheduler task did not stop promptly during shutdown");
            }
        }

        while let Some(mut request) = self.inner.queue.pop_remaining() {
            request.complete(Err(EmbedServeError::shutdown(
                "worker shut down before this request was processed",
            )));
        }

        *self.inner.phase.write() = WorkerPhase::Stopped;
        info!(model = %self.inner.info.name, "worker stopped");
    }
}
