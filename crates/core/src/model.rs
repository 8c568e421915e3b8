//! The capability every embedding model must implement to sit behind a
//! worker. This is the Rust counterpart of the duck-typed `ModelImpl`
//! classes the original service loaded dynamically: `load`, `warmup`,
//! `batch_size`, `batch_wait_s`, `encode`.

use crate::request::{Output, Payload};
use embedserve_common::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Static description of a loaded model, reported on `/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A model capable of turning a batch of payloads into embedding vectors.
///
/// `batch_size` and `batch_wait_s` let a model declare its own batching
/// preference (a larger model may want bigger batches and a longer wait);
/// a non-positive value means "defer to the worker's configured default".
/// `encode` is blocking by design: implementations are expected to run CPU-
/// or GPU-bound tensor work, never `.await` anything. The scheduler is
/// responsible for isolating that call on a blocking thread.
pub trait EmbeddingModel: Send {
    fn load(&mut self) -> Result<()>;

    fn warmup(&mut self) -> Result<()> {
        Ok(())
    }

    fn batch_size(&self) -> i64 {
        -1
    }

    fn batch_wait_s(&self) -> f64 {
        -1.0
    }

    fn info(&self) -> ModelInfo;

    fn encode(&mut self, payloads: &[Payload]) -> Result<Vec<Output>>;
}

/// Resolve a model's declared batch parameters against worker-wide defaults.
/// A non-positive declaration means "use the default".
pub fn resolve_batch_params(
    model: &dyn EmbeddingModel,
    default_batch_size: usize,
    default_batch_wait_s: f64,
) -> (usize, Duration) {
    let batch_size = if model.batch_size() > 0 {
        model.batch_size() as usize
    } else {
        default_batch_size
    };
    let batch_wait_s = if model.batch_wait_s() > 0.0 {
        model.batch_wait_s()
    } else {
        default_batch_wait_s
    };
    (batch_size, Duration::from_secs_f64(batch_wait_s))
}
