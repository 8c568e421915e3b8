//! embedserve-core: the dynamic batching scheduler.
//!
//! A bounded queue admits requests with backpressure, a scheduler greedily
//! assembles batches under a size/latency trade-off, and a blocking model
//! call turns each batch into embeddings that get routed back to their
//! waiters. Everything above this crate (HTTP ingress, model loading, the
//! offline batch pipeline) is a collaborator that talks to a `WorkerHandle`.

pub mod model;
pub mod queue;
pub mod request;
pub mod scheduler;
pub mod worker;

pub use model::{resolve_batch_params, EmbeddingModel, ModelInfo};
pub use queue::{QueueMetricsSnapshot, RequestQueue};
pub use request::{Completion, Output, Payload, Request, RequestId, Response};
pub use worker::{WorkerHandle, WorkerPhase, WorkerSettings};
