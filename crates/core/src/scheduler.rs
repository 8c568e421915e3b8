//! The scheduler loop: drain a batch, run it through the model off the
//! async runtime, and route results back to waiters.

use crate::model::EmbeddingModel;
use crate::queue::RequestQueue;
use crate::request::{Payload, Request, Response};
use crate::worker::WorkerPhase;
use embedserve_common::error::EmbedServeError;
use embedserve_common::metrics::MetricsRegistry;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Runs until `stop` is observed. Intended to be driven inside a single
/// `tokio::spawn`; the model is moved into and back out of a blocking task
/// on every iteration since `encode` is a synchronous, possibly CPU-heavy
/// call that must never run on the async runtime's own threads.
///
/// If `encode` panics rather than returning `Err`, the blocking task dies
/// with the model still inside it — there is no model left to resume
/// batching with, so the batch in flight is failed, the worker is marked
/// `Failed`, and the loop exits instead of spinning on a phantom model.
pub async fn run(
    model_name: String,
    mut model: Box<dyn EmbeddingModel>,
    queue: Arc<RequestQueue>,
    batch_size: usize,
    batch_wait: Duration,
    metrics: Arc<MetricsRegistry>,
    stop: Arc<AtomicBool>,
    phase: Arc<RwLock<WorkerPhase>>,
) {
    debug!(model = %model_name, batch_size, ?batch_wait, "scheduler loop starting");

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        let wait_start = Instant::now();
        let batch = queue.drain(batch_size, batch_wait).await;
        metrics.set_queue_depth(&model_name, queue.depth());

        if batch.is_empty() {
            continue;
        }

        metrics.record_batch(&model_name, batch.len(), wait_start.elapsed().as_secs_f64());

        let payloads: Vec<Payload> = batch.iter().map(|r| r.payload.clone()).collect();
        let batch_len = batch.len();

        let joined = tokio::task::spawn_blocking(move || {
            let outcome = model.encode(&payloads);
            (model, outcome)
        })
        .await;

        let (returned_model, outcome) = match joined {
            Ok(pair) => pair,
            Err(join_err) => {
                let err = EmbedServeError::processing(format!(
                    "encode task panicked: {join_err}"
                ));
                error!(model = %model_name, error = %err, "encode task panicked, worker is dead");
                complete_failure(batch, err, &model_name, &metrics);
                *phase.write() = WorkerPhase::Failed;
                break;
            }
        };
        model = returned_model;

        match outcome {
            Ok(outputs) if outputs.len() == batch_len => {
                complete_success(batch, outputs, &model_name, &metrics);
            }
            Ok(outputs) => {
                let err = EmbedServeError::processing(format!(
                    "model returned {} outputs for a batch of {}",
                    outputs.len(),
                    batch_len
                ));
                error!(model = %model_name, error = %err, "batch size mismatch");
                complete_failure(batch, err, &model_name, &metrics);
            }
            Err(err) => {
                warn!(model = %model_name, error = %err, "encode failed");
                complete_failure(batch, err, &model_name, &metrics);
            }
        }
    }

    debug!(model = %model_name, "scheduler loop stopped");
}

fn complete_success(
    batch: Vec<Request>,
    outputs: Vec<crate::request::Output>,
    model_name: &str,
    metrics: &MetricsRegistry,
) {
    let batch_size = batch.len();
    for (mut request, output) in batch.into_iter().zip(outputs.into_iter()) {
        let processing_time_ms = request.age().as_secs_f64() * 1000.0;
        metrics.record_request(model_name, "success", processing_time_ms / 1000.0);
        request.complete(Ok(Response {
            request_id: request.request_id,
            output,
            batch_size,
            processing_time_ms,
        }));
    }
}

fn complete_failure(batch: Vec<Request>, err: EmbedServeError, model_name: &str, metrics: &MetricsRegistry) {
    metrics.record_error(model_name, err.error_type());
    for mut request in batch {
        if request.is_completed() {
            continue;
        }
        metrics.record_request(model_name, "error", request.age().as_secs_f64());
        let message = err.to_string();
        request.complete(Err(EmbedServeError::processing(message)));
    }
}
