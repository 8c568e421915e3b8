//! embedserve-server: HTTP ingress in front of a single worker.

pub mod http;
pub mod image_utils;
pub mod state;

pub use state::AppState;
