//! Request and response types flowing through the batching core.

use embedserve_common::error::EmbedServeError;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Unique identifier assigned to every admitted request.
pub type RequestId = Uuid;

/// The decoded input handed to a model's `encode`. Decoding and validation
/// happen at the HTTP ingress; by the time a `Payload` reaches the core it is
/// already a well-formed image (and optional text) pair.
#[derive(Debug, Clone)]
pub struct Payload {
    pub image: image::DynamicImage,
    pub text: Option<String>,
}

/// A single embedding vector produced by a model.
pub type Output = Vec<f32>;

/// What a waiter receives once its request has been processed.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: RequestId,
    pub output: Output,
    pub batch_size: usize,
    pub processing_time_ms: f64,
}

/// The result a waiter is ultimately notified with.
pub type Completion = Result<Response, EmbedServeError>;

/// A request sitting in the queue, waiting to be picked up by a batch.
///
/// `completion` is consumed exactly once. If the receiving half has already
/// been dropped (the caller gave up, e.g. on timeout), `send` returns an
/// `Err` that we discard: that's the whole abandonment mechanism, there is
/// no separate cancellation path.
#[derive(Debug)]
pub struct Request {
    pub request_id: RequestId,
    pub payload: Payload,
    pub metadata: serde_json::Value,
    enqueued_at: Instant,
    completion: Option<oneshot::Sender<Completion>>,
}

impl Request {
    /// Build a new request, returning it alongside the receiver the caller
    /// should await for its result.
    pub fn new(payload: Payload, metadata: serde_json::Value) -> (Self, oneshot::Receiver<Completion>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            request_id: Uuid::new_v4(),
            payload,
            metadata,
            enqueued_at: Instant::now(),
            completion: Some(tx),
        };
        (request, rx)
    }

    /// Time elapsed since this request was admitted to the queue.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Whether `complete` has already fired.
    pub fn is_completed(&self) -> bool {
        self.completion.is_none()
    }

    /// Fire the completion channel exactly once; a no-op on subsequent calls.
    pub fn complete(&mut self, result: Completion) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }
}
