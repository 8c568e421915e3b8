//! A minimal CPU image embedder used as the reference `EmbeddingModel`
//! implementation: resize to a fixed grid, flatten to a tensor, project
//! through a linear layer, L2-normalise. Not a CLIP port; it stands in for
//! the kind of candle-backed model this interface is built to host.

use crate::loader::ModelConfigOverrides;
use candle_core::{DType, Device, Tensor};
use embedserve_common::error::{EmbedServeError, Result};
use embedserve_core::model::{EmbeddingModel, ModelInfo};
use embedserve_core::request::{Output, Payload};
use std::collections::HashMap;

const INPUT_SIZE: u32 = 64;
const INPUT_DIM: usize = (INPUT_SIZE * INPUT_SIZE * 3) as usize;
const EMBEDDING_DIM: usize = 128;
const DEFAULT_BATCH_SIZE: i64 = 16;
const DEFAULT_BATCH_WAIT_S: f64 = 0.003;

pub struct LinearClipModel {
    info: ModelInfo,
    batch_size: i64,
    batch_wait_s: f64,
    device: Device,
    projection: Option<Tensor>,
}

impl LinearClipModel {
    pub fn new(info: ModelInfo, overrides: ModelConfigOverrides) -> Self {
        Self {
            info,
            batch_size: overrides.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            batch_wait_s: overrides.batch_wait_s.unwrap_or(DEFAULT_BATCH_WAIT_S),
            device: Device::Cpu,
            projection: None,
        }
    }

    fn payload_to_vec(image: &image::DynamicImage) -> Vec<f32> {
        let resized = image.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();
        rgb.pixels()
            .flat_map(|p| p.0.iter().map(|c| *c as f32 / 255.0))
            .collect()
    }
}

impl EmbeddingModel for LinearClipModel {
    fn load(&mut self) -> Result<()> {
        // A real implementation would load pretrained weights from the
        // model directory. Here we seed a deterministic projection so the
        // same input always yields the same embedding.
        let weights: Vec<f32> = (0..INPUT_DIM * EMBEDDING_DIM)
            .map(|i| {
                let x = (i as f32 * 0.618_034).fract();
                (x - 0.5) * 0.02
            })
            .collect();
        let tensor = Tensor::from_vec(weights, (INPUT_DIM, EMBEDDING_DIM), &self.device)
            .map_err(|e| EmbedServeError::model(format!("failed to build projection tensor: {e}")))?;
        self.projection = Some(tensor);
        Ok(())
    }

    fn warmup(&mut self) -> Result<()> {
        let dummy = image::DynamicImage::new_rgb8(INPUT_SIZE, INPUT_SIZE);
        self.encode(&[Payload { image: dummy, text: None }])?;
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
        let projection = self
            .projection
            .as_ref()
            .ok_or_else(|| EmbedServeError::model("model not loaded"))?;

        let flattened: Vec<f32> = payloads.iter().flat_map(|p| Self::payload_to_vec(&p.image)).collect();
        let batch = Tensor::from_vec(flattened, (payloads.len(), INPUT_DIM), &self.device)
            .map_err(|e| EmbedServeError::model(format!("failed to build input tensor: {e}")))?
            .to_dtype(DType::F32)
            .map_err(|e| EmbedServeError::model(format!("dtype conversion failed: {e}")))?;

        let embedded = batch
            .matmul(projection)
            .map_err(|e| EmbedServeError::processing(format!("projection matmul failed: {e}")))?;

        let norms = embedded
            .sqr()
            .and_then(|t| t.sum_keepdim(1))
            .and_then(|t| t.sqrt())
            .map_err(|e| EmbedServeError::processing(format!("norm computation failed: {e}")))?;
        let normalised = embedded
            .broadcast_div(&norms)
            .map_err(|e| EmbedServeError::processing(format!("normalisation failed: {e}")))?;

        let rows: Vec<Vec<f32>> = normalised
            .to_vec2()
            .map_err(|e| EmbedServeError::processing(format!("failed to materialise output: {e}")))?;
        Ok(rows)
    }
}

pub fn build(
    info: &ModelInfo,
    overrides: ModelConfigOverrides,
    _metadata: &HashMap<String, serde_json::Value>,
) -> Result<Box<dyn EmbeddingModel>> {
    Ok(Box::new(LinearClipModel::new(info.clone(), overrides)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_batch_to_unit_vectors() {
        let info = ModelInfo {
            name: "linear-clip".to_string(),
            version: None,
            description: None,
            metadata: Default::default(),
        };
        let mut model = LinearClipModel::new(info, ModelConfigOverrides::default());
        model.load().unwrap();

        let payloads = vec![
            Payload { image: image::DynamicImage::new_rgb8(32, 32), text: None },
            Payload { image: image::DynamicImage::new_rgb8(64, 64), text: None },
        ];
        let outputs = model.encode(&payloads).unwrap();
        assert_eq!(outputs.len(), 2);
        for v in outputs {
            assert_eq!(v.len(), EMBEDDING_DIM);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-3);
        }
    }
}
