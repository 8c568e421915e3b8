//! embedserve-models: resolves a model directory's `config.json` into a
//! `Box<dyn EmbeddingModel>`, plus the reference implementations.

pub mod linear_clip;
pub mod loader;
pub mod mock;

pub use loader::{load_model, ModelConfigOverrides, ModelFactory};
