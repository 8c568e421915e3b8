//! EmbedServe common library
//!
//! Shared configuration, error, and metrics types used across the scheduler
//! core, the HTTP ingress, and the offline batch pipeline.

pub mod config;
pub mod error;
pub mod metrics;

pub use config::EmbedServeConfig;
pub use error::{EmbedServeError, Result};
pub use metrics::{MetricsRegistry, METRICS};
