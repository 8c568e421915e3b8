//! Common error types for EmbedServe
//!
//! This module defines all error types used across the EmbedServe system.

use thiserror::Error;

/// Main error type for EmbedServe
#[derive(Error, Debug)]
pub enum EmbedServeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model loading errors
    #[error("Model error: {0}")]
    Model(String),

    /// Model directory or kind could not be resolved
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid image payload
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Invalid request (bad content-type, oversized upload, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Queue full (backpressure). Carries the queue depth observed at rejection time.
    #[error("Queue full at depth {depth}: {message}")]
    QueueFull { message: String, depth: usize },

    /// A request waited longer than the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// A batch failed during `encode`
    #[error("Processing error: {0}")]
    Processing(String),

    /// Worker is shutting down
    #[error("Worker is shutting down: {0}")]
    Shutdown(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EmbedServeError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        EmbedServeError::Config(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        EmbedServeError::Model(msg.into())
    }

    /// Create a model-not-found error
    pub fn model_not_found(msg: impl Into<String>) -> Self {
        EmbedServeError::ModelNotFound(msg.into())
    }

    /// Create an invalid-image error
    pub fn invalid_image(msg: impl Into<String>) -> Self {
        EmbedServeError::InvalidImage(msg.into())
    }

    /// Create an invalid-request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        EmbedServeError::InvalidRequest(msg.into())
    }

    /// Create a queue-full error, carrying the depth observed at rejection time
    pub fn queue_full(msg: impl Into<String>, depth: usize) -> Self {
        EmbedServeError::QueueFull {
            message: msg.into(),
            depth,
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        EmbedServeError::Timeout(msg.into())
    }

    /// Create a processing error
    pub fn processing(msg: impl Into<String>) -> Self {
        EmbedServeError::Processing(msg.into())
    }

    /// Create a shutdown error
    pub fn shutdown(msg: impl Into<String>) -> Self {
        EmbedServeError::Shutdown(msg.into())
    }

    /// Create a generic internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        EmbedServeError::Internal(msg.into())
    }

    /// Short, stable tag used as the `error_type` metric label. Never includes
    /// the message body, so cardinality stays bounded regardless of input.
    pub fn error_type(&self) -> &'static str {
        match self {
            EmbedServeError::Config(_) => "config",
            EmbedServeError::Model(_) => "model",
            EmbedServeError::ModelNotFound(_) => "model_not_found",
            EmbedServeError::Serialization(_) => "serialization",
            EmbedServeError::Io(_) => "io",
            EmbedServeError::InvalidImage(_) => "invalid_image",
            EmbedServeError::InvalidRequest(_) => "invalid_request",
            EmbedServeError::QueueFull { .. } => "queue_full",
            EmbedServeError::Timeout(_) => "timeout",
            EmbedServeError::Processing(_) => "processing_error",
            EmbedServeError::Shutdown(_) => "shutdown",
            EmbedServeError::Internal(_) => "unknown",
        }
    }
}

/// Result type alias for EmbedServe operations
pub type Result<T> = std::result::Result<T, EmbedServeError>;
