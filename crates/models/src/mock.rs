//! Deterministic model used in tests and local development. Produces a
//! fixed-width embedding derived from image dimensions, no real inference.

use crate::loader::ModelConfigOverrides;
use embedserve_common::error::Result;
use embedserve_core::model::{EmbeddingModel, ModelInfo};
use embedserve_core::request::{Output, Payload};
use std::collections::HashMap;

pub const EMBEDDING_DIM: usize = 8;

pub struct MockEmbeddingModel {
    info: ModelInfo,
    batch_size: i64,
    batch_wait_s: f64,
}

impl MockEmbeddingModel {
    pub fn new(info: ModelInfo, overrides: ModelConfigOverrides) -> Self {
        Self {
            info,
            batch_size: overrides.batch_size.unwrap_or(-1),
            batch_wait_s: overrides.batch_wait_s.unwrap_or(-1.0),
        }
    }
}

impl EmbeddingModel for MockEmbeddingModel {
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
        self.info.clone()
    }

    fn encode(&mut self, payloads: &[Payload]) -> Result<Vec<Output>> {
        Ok(payloads
            .iter()
            .map(|p| {
                let (w, h) = (p.image.width() as f32, p.image.height() as f32);
                let mut v = vec![0.0_f32; EMBEDDING_DIM];
                v[0] = w;
                v[1] = h;
                v
            })
            .collect())
    }
}

pub fn build(
    info: &ModelInfo,
    overrides: ModelConfigOverrides,
    _metadata: &HashMap<String, serde_json::Value>,
) -> Result<Box<dyn EmbeddingModel>> {
    Ok(Box::new(MockEmbeddingModel::new(info.clone(), overrides)))
}
