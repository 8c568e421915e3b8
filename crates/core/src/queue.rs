//! Bounded, lock-free request queue with async admission/drain.
//!
//! `SegQueue` gives us a lock-free MPMC queue; we layer an atomic depth
//! counter on top of it to enforce capacity (SegQueue itself is unbounded)
//! and a `Notify` to let `drain` sleep instead of spinning while empty.

use crate::request::Request;
use embedserve_common::error::{EmbedServeError, Result};
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::trace;

/// Point-in-time counters, exposed on `/health` and to the metrics layer.
#[derive(Debug, Clone, Copy)]
pub struct QueueMetricsSnapshot {
    pub depth: usize,
    pub capacity: usize,
    pub admitted: u64,
    pub rejected: u64,
    pub drain_timeouts: u64,
}

impl QueueMetricsSnapshot {
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.depth as f64 / self.capacity as f64
        }
    }
}

pub struct RequestQueue {
    inner: SegQueue<Request>,
    capacity: usize,
    depth: AtomicUsize,
    admitted: AtomicU64,
    rejected: AtomicU64,
    drain_timeouts: AtomicU64,
    notify: Notify,
    /// Soft signal: stop blocking on new arrivals, but keep serving what's
    /// already queued. Set when the worker enters Draining.
    draining: AtomicBool,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: SegQueue::new(),
            capacity,
            depth: AtomicUsize::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            drain_timeouts: AtomicU64::new(0),
            notify: Notify::new(),
            draining: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    pub fn is_full(&self) -> bool {
        self.depth() >= self.capacity
    }

    /// Reserve a slot with a CAS loop, then push. Rejects once `capacity` is
    /// reached; never blocks.
    pub fn admit(&self, request: Request) -> Result<()> {
        loop {
            let depth = self.depth.load(Ordering::Acquire);
            if depth >= self.capacity {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(EmbedServeError::queue_full(
                    "request queue is full",
                    depth,
                ));
            }
            if self
                .depth
                .compare_exchange_weak(depth, depth + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        self.inner.push(request);
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        trace!(depth = self.depth(), "request admitted");
        Ok(())
    }

    fn try_pop(&self) -> Option<Request> {
        let request = self.inner.pop();
        if request.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        request
    }

    /// Mark the queue as draining: `drain` stops blocking on new arrivals
    /// (there shouldn't be any, the worker has already stopped admitting)
    /// but keeps greedily pulling whatever is already queued.
    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Pop up to `max_batch` requests, waiting at most `max_wait` for the
    /// first one to arrive. Returns an empty vec on timeout or if draining
    /// and nothing is queued. Never blocks past the first item: once one
    /// request is in hand, remaining slots are filled non-blockingly.
    pub async fn drain(&self, max_batch: usize, max_wait: Duration) -> Vec<Request> {
        let mut batch = Vec::with_capacity(max_batch.min(64));

        if let Some(first) = self.try_pop() {
            batch.push(first);
        } else if self.draining.load(Ordering::Acquire) {
            return batch;
        } else {
            let deadline = Instant::now() + max_wait;
            loop {
                let notified = self.notify.notified();
                if let Some(first) = self.try_pop() {
                    batch.push(first);
                    break;
                }
                if self.draining.load(Ordering::Acquire) {
                    return batch;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    self.drain_timeouts.fetch_add(1, Ordering::Relaxed);
                    return batch;
                }
                match timeout(remaining, notified).await {
                    Ok(()) => continue,
                    Err(_elapsed) => {
                        self.drain_timeouts.fetch_add(1, Ordering::Relaxed);
                        return batch;
                    }
                }
            }
        }

        while batch.len() < max_batch {
            match self.try_pop() {
                Some(request) => batch.push(request),
                None => break,
            }
        }

        batch
    }

    /// Non-blocking pop, used to drain and fail whatever is left once a
    /// worker has finished draining and is shutting down.
    pub fn pop_remaining(&self) -> Option<Request> {
        self.try_pop()
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            depth: self.depth(),
            capacity: self.capacity,
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            drain_timeouts: self.drain_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Payload;
    use image::{DynamicImage, RgbImage};

    fn payload() -> Payload {
        Payload {
            image: DynamicImage::ImageRgb8(RgbImage::new(1, 1)),
            text: None,
        }
    }

    fn admit_one(queue: &RequestQueue) -> tokio::sync::oneshot::Receiver<crate::request::Completion> {
        let (req, rx) = Request::new(payload(), serde_json::Value::Null);
        queue.admit(req).unwrap();
        rx
    }

    #[test]
    fn rejects_past_capacity() {
        let queue = RequestQueue::new(1);
        let _rx = admit_one(&queue);
        let (req, _rx2) = Request::new(payload(), serde_json::Value::Null);
        let err = queue.admit(req).unwrap_err();
        assert_eq!(err.error_type(), "queue_full");
        assert_eq!(queue.metrics().rejected, 1);
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_full_batch_available() {
        let queue = RequestQueue::new(8);
        for _ in 0..4 {
            let _ = admit_one(&queue);
        }
        let batch = queue.drain(4, Duration::from_secs(1)).await;
        assert_eq!(batch.len(), 4);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn drain_times_out_when_empty() {
        let queue = RequestQueue::new(8);
        let start = Instant::now();
        let batch = queue.drain(4, Duration::from_millis(20)).await;
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(queue.metrics().drain_timeouts, 1);
    }

    #[tokio::test]
    async fn drain_wakes_on_admit_before_deadline() {
        let queue = std::sync::Arc::new(RequestQueue::new(8));
        let q2 = queue.clone();
        let waiter = tokio::spawn(async move { q2.drain(4, Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = admit_one(&queue);

        let batch = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drain should wake promptly")
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn draining_returns_whatever_is_queued_without_blocking() {
        let queue = RequestQueue::new(8);
        let _ = admit_one(&queue);
        queue.start_draining();
        let batch = queue.drain(4, Duration::from_secs(5)).await;
        assert_eq!(batch.len(), 1);

        let empty = queue.drain(4, Duration::from_secs(5)).await;
        assert!(empty.is_empty());
    }
}
