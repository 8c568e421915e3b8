//! End-to-end tests driving a full worker: admission, batch assembly,
//! encode, and completion routing.

use embedserve_common::metrics::MetricsRegistry;
use embedserve_core::model::{EmbeddingModel, ModelInfo};
use embedserve_core::request::{Output, Payload};
use embedserve_core::worker::{WorkerHandle, WorkerSettings};
use embedserve_common::error::{EmbedServeError, Result};
use image::{DynamicImage, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Deterministic model: records the largest batch it was ever called with,
/// and can be told to fail or to sleep inside `encode` to exercise timeouts.
struct MockModel {
    batch_size: i64,
    batch_wait_s: f64,
    fail: bool,
    mismatched_outputs: bool,
    sleep: Duration,
    max_batch_seen: Arc<AtomicUsize>,
}

impl MockModel {
    fn new(batch_size: i64, batch_wait_s: f64, max_batch_seen: Arc<AtomicUsize>) -> Self {
        Self {
            batch_size,
            batch_wait_s,
            fail: false,
            mismatched_outputs: false,
            sleep: Duration::ZERO,
            max_batch_seen,
        }
    }
}

impl EmbeddingModel for MockModel {
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn batch_size(&self) -> i64 {
        self.batch_size
    }

    fn batch_wait_s(&self) -> f64 {
        self.batch_wait_s
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: "mock".to_string(),
            version: None,
            description: None,
            metadata: Default::default(),
        }
    }

    fn encode(&mut self, payloads: &[Payload]) -> Result<Vec<Output>> {
        self.max_batch_seen
            .fetch_max(payloads.len(), Ordering::Relaxed);
        if !self.sleep.is_zero() {
            std::thread::sleep(self.sleep);
        }
        if self.fail {
            return Err(EmbedServeError::processing("injected failure"));
        }
        if self.mismatched_outputs {
            return Ok(payloads.iter().skip(1).map(|_| vec![1.0_f32]).collect());
        }
        Ok(payloads.iter().map(|_| vec![1.0_f32]).collect())
    }
}

fn payload() -> Payload {
    Payload {
        image: DynamicImage::ImageRgb8(RgbImage::new(2, 2)),
        text: None,
    }
}

fn settings(max_queue_size: usize, request_timeout: Duration) -> WorkerSettings {
    WorkerSettings {
        max_queue_size,
        request_timeout,
        warmup_enabled: true,
        default_batch_size: 8,
        default_batch_wait_s: 0.01,
    }
}

#[tokio::test]
async fn single_request_completes_successfully() {
    let max_batch_seen = Arc::new(AtomicUsize::new(0));
    let model = Box::new(MockModel::new(8, 0.01, max_batch_seen));
    let worker = WorkerHandle::start(
        "mock",
        model,
        settings(16, Duration::from_secs(2)),
        Arc::new(MetricsRegistry::new()),
    )
    .await
    .unwrap();

    let response = worker
        .submit(payload(), serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(response.output, vec![1.0_f32]);
    assert_eq!(response.batch_size, 1);
}

#[tokio::test]
async fn concurrent_requests_are_coalesced_into_one_batch() {
    let max_batch_seen = Arc::new(AtomicUsize::new(0));
    let model = Box::new(MockModel::new(8, 0.2, max_batch_seen.clone()));
    let worker = WorkerHandle::start(
        "mock",
        model,
        settings(32, Duration::from_secs(2)),
        Arc::new(MetricsRegistry::new()),
    )
    .await
    .unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let worker = worker.clone();
        handles.push(tokio::spawn(
            async move { worker.submit(payload(), serde_json::Value::Null).await },
        ));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(max_batch_seen.load(Ordering::Relaxed) >= 2);
}

#[tokio::test]
async fn batch_never_exceeds_declared_batch_size() {
    let max_batch_seen = Arc::new(AtomicUsize::new(0));
    let model = Box::new(MockModel::new(3, 0.05, max_batch_seen.clone()));
    let worker = WorkerHandle::start(
        "mock",
        model,
        settings(64, Duration::from_secs(2)),
        Arc::new(MetricsRegistry::new()),
    )
    .await
    .unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let worker = worker.clone();
        handles.push(tokio::spawn(
            async move { worker.submit(payload(), serde_json::Value::Null).await },
        ));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(max_batch_seen.load(Ordering::Relaxed) <= 3);
}

#[tokio::test]
async fn backpressure_rejects_once_queue_is_full() {
    let max_batch_seen = Arc::new(AtomicUsize::new(0));
    // A long sleep inside encode keeps the one in-flight batch from
    // draining the queue, so we can reliably observe a full queue.
    let mut model = MockModel::new(1, 0.01, max_batch_seen);
    model.sleep = Duration::from_millis(300);
    let worker = WorkerHandle::start(
        "mock",
        Box::new(model),
        settings(1, Duration::from_secs(5)),
        Arc::new(MetricsRegistry::new()),
    )
    .await
    .unwrap();

    // First request gets picked up by the scheduler immediately, freeing the
    // queue slot it occupied; give it a moment to be admitted into the
    // in-flight batch before filling the queue behind it.
    let worker2 = worker.clone();
    let first = tokio::spawn(async move { worker2.submit(payload(), serde_json::Value::Null).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    worker.submit(payload(), serde_json::Value::Null).await.ok();
    let rejection = worker.submit(payload(), serde_json::Value::Null).await;

    assert!(matches!(rejection, Err(EmbedServeError::QueueFull { .. })));
    first.abort();
}

#[tokio::test]
async fn request_times_out_when_batch_never_forms_in_time() {
    let max_batch_seen = Arc::new(AtomicUsize::new(0));
    let mut model = MockModel::new(1, 0.01, max_batch_seen);
    model.sleep = Duration::from_millis(300);
    let worker = WorkerHandle::start(
        "mock",
        Box::new(model),
        settings(4, Duration::from_millis(50)),
        Arc::new(MetricsRegistry::new()),
    )
    .await
    .unwrap();

    let first = worker.submit(payload(), serde_json::Value::Null);
    let second = worker.submit(payload(), serde_json::Value::Null);
    let (_first_result, second_result) = tokio::join!(first, second);

    assert!(matches!(second_result, Err(EmbedServeError::Timeout(_))));
}

#[tokio::test]
async fn encode_failure_propagates_to_every_waiter_in_the_batch() {
    let max_batch_seen = Arc::new(AtomicUsize::new(0));
    let mut model = MockModel::new(8, 0.2, max_batch_seen);
    model.fail = true;
    let worker = WorkerHandle::start(
        "mock",
        Box::new(model),
        settings(16, Duration::from_secs(2)),
        Arc::new(MetricsRegistry::new()),
    )
    .await
    .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let worker = worker.clone();
        handles.push(tokio::spawn(
            async move { worker.submit(payload(), serde_json::Value::Null).await },
        ));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(EmbedServeError::Processing(_))));
    }
}

#[tokio::test]
async fn mismatched_output_count_propagates_to_every_waiter_in_the_batch() {
    let max_batch_seen = Arc::new(AtomicUsize::new(0));
    let mut model = MockModel::new(8, 0.2, max_batch_seen);
    model.mismatched_outputs = true;
    let worker = WorkerHandle::start(
        "mock",
        Box::new(model),
        settings(16, Duration::from_secs(2)),
        Arc::new(MetricsRegistry::new()),
    )
    .await
    .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let worker = worker.clone();
        handles.push(tokio::spawn(
            async move { worker.submit(payload(), serde_json::Value::Null).await },
        ));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(EmbedServeError::Processing(_))));
    }
}

#[tokio::test]
async fn shutdown_drains_queued_work_before_stopping() {
    let max_batch_seen = Arc::new(AtomicUsize::new(0));
    let model = Box::new(MockModel::new(8, 0.01, max_batch_seen));
    let worker = WorkerHandle::start(
        "mock",
        model,
        settings(16, Duration::from_secs(2)),
        Arc::new(MetricsRegistry::new()),
    )
    .await
    .unwrap();

    let worker2 = worker.clone();
    let in_flight = tokio::spawn(async move { worker2.submit(payload(), serde_json::Value::Null).await });

    worker.shutdown(Duration::from_secs(2)).await;

    assert!(in_flight.await.unwrap().is_ok());
    assert_eq!(worker.phase(), embedserve_core::WorkerPhase::Stopped);

    let rejected = worker.submit(payload(), serde_json::Value::Null).await;
    assert!(matches!(rejected, Err(EmbedServeError::Shutdown(_))));
}
