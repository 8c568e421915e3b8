//! Resolves a model directory's `config.json` into a boxed `EmbeddingModel`.
//!
//! The original service imported `model.py` at runtime via `importlib`,
//! keyed only on a file existing on disk. Rust has no equivalent of that;
//! instead `config.json` names a `kind`, which we resolve against a small
//! compiled-in registry of known implementations.

use embedserve_common::error::{EmbedServeError, Result};
use embedserve_core::model::{EmbeddingModel, ModelInfo};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    name: String,
    kind: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    batch_size: Option<i64>,
    #[serde(default)]
    batch_wait_s: Option<f64>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

/// Parameters a `config.json` can declare to override a model's own
/// defaults, passed through to the model's factory function.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelConfigOverrides {
    pub batch_size: Option<i64>,
    pub batch_wait_s: Option<f64>,
}

/// A factory registered for a given `kind` value in `config.json`.
pub type ModelFactory =
    fn(&ModelInfo, ModelConfigOverrides, &HashMap<String, serde_json::Value>) -> Result<Box<dyn EmbeddingModel>>;

/// Build-in registry of known model kinds. New implementations are added
/// here, not discovered at runtime.
fn registry() -> HashMap<&'static str, ModelFactory> {
    let mut map: HashMap<&'static str, ModelFactory> = HashMap::new();
    map.insert("mock", crate::mock::build);
    map.insert("linear_clip", crate::linear_clip::build);
    map
}

/// Load a model from `model_dir/config.json`, resolving its `kind` against
/// the compiled-in registry and constructing the implementation.
pub fn load_model(model_dir: &Path) -> Result<Box<dyn EmbeddingModel>> {
    if !model_dir.is_dir() {
        return Err(EmbedServeError::model_not_found(format!(
            "model directory not found: {}",
            model_dir.display()
        )));
    }

    let config_path = model_dir.join("config.json");
    let raw = std::fs::read_to_string(&config_path)
        .map_err(|e| EmbedServeError::config(format!("config.json not found in {}: {e}", model_dir.display())))?;
    let parsed: ModelConfigFile = serde_json::from_str(&raw)
        .map_err(|e| EmbedServeError::config(format!("invalid config.json in {}: {e}", model_dir.display())))?;

    info!(model = %parsed.name, kind = %parsed.kind, "loading model config");

    let info = ModelInfo {
        name: parsed.name,
        version: parsed.version,
        description: parsed.description,
        metadata: parsed.metadata.clone(),
    };

    let factory = registry().get(parsed.kind.as_str()).copied().ok_or_else(|| {
        EmbedServeError::model_not_found(format!("no registered model implementation for kind '{}'", parsed.kind))
    })?;

    let overrides = ModelConfigOverrides {
        batch_size: parsed.batch_size,
        batch_wait_s: parsed.batch_wait_s,
    };
    factory(&info, overrides, &parsed.metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_mock_model_from_config() {
        let dir = std::env::temp_dir().join(format!(
            "embedserve-models-test-{:?}",
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.json"),
            r#"{"name":"test-mock","kind":"mock","batch_size":4,"batch_wait_s":0.01}"#,
        )
        .unwrap();

        let model = load_model(&dir).unwrap();
        assert_eq!(model.info().name, "test-mock");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_unknown_kind() {
        let dir = std::env::temp_dir().join(format!(
            "embedserve-models-test-unknown-{:?}",
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.json"),
            r#"{"name":"test","kind":"does-not-exist"}"#,
        )
        .unwrap();

        let err = load_model(&dir).unwrap_err();
        assert_eq!(err.error_type(), "model_not_found");

        std::fs::remove_dir_all(&dir).ok();
    }
}
