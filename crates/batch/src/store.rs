//! A single `opendal::Operator` abstracting over local filesystem and S3
//! storage, so the pipeline doesn't care which backend a shard path names.

use embedserve_common::error::{EmbedServeError, Result};
use opendal::{Operator, Scheme};

#[derive(Debug, Clone)]
pub enum ShardLocation {
    Local { root: String },
    S3 { bucket: String, region: String, prefix: String },
}

impl ShardLocation {
    /// Parse an input/output directory argument: `s3://bucket/prefix` or a
    /// plain local path.
    pub fn parse(uri: &str) -> Self {
        if let Some(rest) = uri.strip_prefix("s3://") {
            let mut parts = rest.splitn(2, '/');
            let bucket = parts.next().unwrap_or_default().to_string();
            let prefix = parts.next().unwrap_or_default().to_string();
            ShardLocation::S3 {
                bucket,
                region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                prefix,
            }
        } else {
            ShardLocation::Local { root: uri.to_string() }
        }
    }

    pub fn build_operator(&self) -> Result<Operator> {
        let op = match self {
            ShardLocation::Local { root } => {
                let builder = opendal::services::Fs::default().root(root);
                Operator::new(builder)
                    .map_err(|e| EmbedServeError::config(format!("failed to create fs operator: {e}")))?
                    .finish()
            }
            ShardLocation::S3 { bucket, region, .. } => {
                let builder = opendal::services::S3::default().bucket(bucket).region(region);
                Operator::new(builder)
                    .map_err(|e| EmbedServeError::config(format!("failed to create s3 operator: {e}")))?
                    .finish()
            }
        };
        Ok(op)
    }

    /// The prefix under which shard objects live, relative to the operator's root.
    pub fn prefix(&self) -> &str {
        match self {
            ShardLocation::Local { .. } => "",
            ShardLocation::S3 { prefix, .. } => prefix,
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            ShardLocation::Local { .. } => Scheme::Fs,
            ShardLocation::S3 { .. } => Scheme::S3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_s3_uri() {
        let loc = ShardLocation::parse("s3://my-bucket/datasets/shard-0");
        match loc {
            ShardLocation::S3 { bucket, prefix, .. } => {
                assert_eq!(bucket, "my-bucket");
                assert_eq!(prefix, "datasets/shard-0");
            }
            _ => panic!("expected S3 location"),
        }
    }

    #[test]
    fn parses_local_path() {
        let loc = ShardLocation::parse("/data/shards");
        assert!(matches!(loc, ShardLocation::Local { .. }));
    }
}
