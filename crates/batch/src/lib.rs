//! embedserve-batch: offline batch inference over webdataset-style parquet
//! shards, reusing the same `WorkerHandle` the HTTP ingress drives.

pub mod pipeline;
pub mod store;

pub use pipeline::{run, PipelineSummary};
pub use store::ShardLocation;
