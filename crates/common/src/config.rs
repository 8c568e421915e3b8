//! Configuration structures for EmbedServe
//!
//! Configuration is loaded from a YAML file and can be overridden by
//! environment variables prefixed `EMBEDSERVE_`, with `__` as the nested
//! delimiter (e.g. `EMBEDSERVE_SERVER__MAX_QUEUE_SIZE=2048`).

use crate::error::{EmbedServeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the EmbedServe service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedServeConfig {
    pub service: ServiceConfig,
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub security: SecurityConfig,
}

impl Default for EmbedServeConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            server: ServerConfig::default(),
            models: ModelsConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// Service-level identity, used by `/health` and `/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "embedserve".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Core scheduler inputs. These are the only knobs the scheduler itself consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub max_queue_size: usize,
    pub request_timeout_s: u64,
    pub shutdown_timeout_s: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1024,
            request_timeout_s: 30,
            shutdown_timeout_s: 60,
        }
    }
}

/// Defaults applied when a model declares non-positive batch parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub warmup_enabled: bool,
    pub default_batch_size: usize,
    pub default_batch_wait_s: f64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            warmup_enabled: true,
            default_batch_size: 16,
            default_batch_wait_s: 0.003,
        }
    }
}

/// Structured logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Plain,
}

/// Prometheus metrics exposition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

/// Ingress-side request validation limits. Enforced by `embedserve-server`,
/// not by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_upload_size_mb: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_upload_size_mb: 10,
        }
    }
}

impl EmbedServeConfig {
    /// Load configuration from a YAML file, then apply `EMBEDSERVE_`-prefixed
    /// environment overrides with `__` as the nesting delimiter.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("EMBEDSERVE")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| EmbedServeError::config(format!("failed to build configuration: {e}")))?;

        let config: EmbedServeConfig = built
            .try_deserialize()
            .map_err(|e| EmbedServeError::config(format!("failed to parse configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants that serde's defaults can't express.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_queue_size == 0 {
            return Err(EmbedServeError::config(
                "server.max_queue_size must be greater than zero",
            ));
        }
        if self.models.default_batch_size == 0 {
            return Err(EmbedServeError::config(
                "models.default_batch_size must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server.request_timeout_s)
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server.shutdown_timeout_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EmbedServeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.max_queue_size, 1024);
        assert_eq!(config.models.default_batch_size, 16);
    }

    #[test]
    fn rejects_zero_queue_size() {
        let mut config = EmbedServeConfig::default();
        config.server.max_queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_yaml_file() {
        let dir = std::env::temp_dir().join(format!(
            "embedserve-config-test-{:?}",
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(
            &path,
            "server:\n  max_queue_size: 42\n  request_timeout_s: 5\n",
        )
        .unwrap();

        let config = EmbedServeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.max_queue_size, 42);
        assert_eq!(config.server.request_timeout_s, 5);
        // Unset fields keep their defaults.
        assert_eq!(config.server.shutdown_timeout_s, 60);

        std::fs::remove_dir_all(&dir).ok();
    }
}
