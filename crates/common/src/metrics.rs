//! Metrics collection for EmbedServe
//!
//! Prometheus metrics for the batching core and the services built on it.
//! All label sets are bounded: `{model, status, error_type}`, never a
//! per-request value, so cardinality can't grow with traffic.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics registry for EmbedServe.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,

    /// `inference_requests_total{model, status}`
    pub requests_total: IntCounterVec,
    /// `inference_request_duration_seconds{model}`
    pub request_duration: HistogramVec,
    /// `inference_batch_size{model}`
    pub batch_size: HistogramVec,
    /// `inference_batch_wait_seconds{model}`
    pub batch_wait: HistogramVec,
    /// `inference_queue_depth{model}`
    pub queue_depth: IntGaugeVec,
    /// `inference_queue_rejections_total{model}`
    pub queue_rejections: IntCounterVec,
    /// `inference_model_load_seconds{model}`
    pub model_load_seconds: GaugeVec,
    /// `inference_model_warmup_seconds{model}`
    pub model_warmup_seconds: GaugeVec,
    /// `inference_errors_total{model, error_type}`
    pub errors_total: IntCounterVec,
}

lazy_static! {
    /// Process-wide metrics registry, mirroring the convention of the
    /// `prometheus` crate's default registry.
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let requests_total = IntCounterVec::new(
            Opts::new(
                "inference_requests_total",
                "Total number of inference requests",
            ),
            &["model", "status"],
        )
        .unwrap();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "inference_request_duration_seconds",
                "Request processing duration in seconds, admission to completion",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["model"],
        )
        .unwrap();

        let batch_size = HistogramVec::new(
            HistogramOpts::new("inference_batch_size", "Batch size distribution")
                .buckets(vec![
                    1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0,
                ]),
            &["model"],
        )
        .unwrap();

        let batch_wait = HistogramVec::new(
            HistogramOpts::new(
                "inference_batch_wait_seconds",
                "Time spent waiting to form a batch",
            )
            .buckets(vec![0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5]),
            &["model"],
        )
        .unwrap();

        let queue_depth = IntGaugeVec::new(
            Opts::new("inference_queue_depth", "Current depth of the request queue"),
            &["model"],
        )
        .unwrap();

        let queue_rejections = IntCounterVec::new(
            Opts::new(
                "inference_queue_rejections_total",
                "Total number of requests rejected because the queue was full",
            ),
            &["model"],
        )
        .unwrap();

        let model_load_seconds = GaugeVec::new(
            Opts::new("inference_model_load_seconds", "Time taken to load the model"),
            &["model"],
        )
        .unwrap();

        let model_warmup_seconds = GaugeVec::new(
            Opts::new(
                "inference_model_warmup_seconds",
                "Time taken to warm up the model",
            ),
            &["model"],
        )
        .unwrap();

        let errors_total = IntCounterVec::new(
            Opts::new("inference_errors_total", "Total number of errors"),
            &["model", "error_type"],
        )
        .unwrap();

        registry
            .register(Box::new(requests_total.clone()))
            .unwrap();
        registry
            .register(Box::new(request_duration.clone()))
            .unwrap();
        registry.register(Box::new(batch_size.clone())).unwrap();
        registry.register(Box::new(batch_wait.clone())).unwrap();
        registry.register(Box::new(queue_depth.clone())).unwrap();
        registry
            .register(Box::new(queue_rejections.clone()))
            .unwrap();
        registry
            .register(Box::new(model_load_seconds.clone()))
            .unwrap();
        registry
            .register(Box::new(model_warmup_seconds.clone()))
            .unwrap();
        registry.register(Box::new(errors_total.clone())).unwrap();

        Self {
            registry,
            requests_total,
            request_duration,
            batch_size,
            batch_wait,
            queue_depth,
            queue_rejections,
            model_load_seconds,
            model_warmup_seconds,
            errors_total,
        }
    }

    pub fn record_request(&self, model: &str, status: &str, duration_secs: f64) {
        self.requests_total.with_label_values(&[model, status]).inc();
        self.request_duration
            .with_label_values(&[model])
            .observe(duration_secs);
    }

    pub fn record_batch(&self, model: &str, size: usize, wait_secs: f64) {
        self.batch_size.with_label_values(&[model]).observe(size as f64);
        self.batch_wait.with_label_values(&[model]).observe(wait_secs);
    }

    pub fn set_queue_depth(&self, model: &str, depth: usize) {
        self.queue_depth.with_label_values(&[model]).set(depth as i64);
    }

    pub fn record_queue_rejection(&self, model: &str) {
        self.queue_rejections.with_label_values(&[model]).inc();
    }

    pub fn record_model_load(&self, model: &str, duration_secs: f64) {
        self.model_load_seconds
            .with_label_values(&[model])
            .set(duration_secs);
    }

    pub fn record_model_warmup(&self, model: &str, duration_secs: f64) {
        self.model_warmup_seconds
            .with_label_values(&[model])
            .set(duration_secs);
    }

    pub fn record_error(&self, model: &str, error_type: &str) {
        self.errors_total
            .with_label_values(&[model, error_type])
            .inc();
    }

    /// Render all registered metrics in Prometheus text exposition format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for measuring the duration of a closure against a plain
/// (unlabeled) histogram. Kept for callers that don't need per-model labels.
pub trait LatencyTimer {
    fn observe_duration<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn observe_duration<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_gathers() {
        let metrics = MetricsRegistry::new();

        metrics.record_request("clip", "success", 0.012);
        metrics.record_batch("clip", 8, 0.004);
        metrics.set_queue_depth("clip", 3);
        metrics.record_queue_rejection("clip");
        metrics.record_error("clip", "timeout");

        let output = metrics.gather();
        assert!(output.contains("inference_requests_total"));
        assert!(output.contains("inference_batch_size"));
        assert!(output.contains("inference_queue_depth"));
        assert!(output.contains("model=\"clip\""));
    }
}
