//! Object storage for mod packages.
//!
//! Implements [`modvault_core::ArtifactStore`] over any backend the
//! `object_store` crate supports. Staged uploads, canonical packages and
//! per-target artifacts are plain objects under a fixed key schema (see
//! [`naming`]).
//!
//! # Store URLs
//!
//! ```text
//! s3://my-bucket/modvault?region=eu-west-1
//! file:///var/lib/modvault
//! memory://  (for testing)
//! ```

pub mod archive;
pub mod naming;
pub mod object_store_backend;

use modvault_core::{StoreError, StoreResult};

pub use archive::{sha256_hex, split_target, write_package};
pub use naming::KeyBuilder;
pub use object_store_backend::ObjectStoreArtifactStore;

/// Parsed store specification from config.
#[derive(Debug, Clone)]
pub struct StoreSpec {
    /// The scheme (s3, file, memory)
    pub scheme: String,
    /// Bucket name (empty for file://)
    pub bucket: Option<String>,
    /// Base prefix/path within the bucket
    pub prefix: String,
    /// Optional region (for S3)
    pub region: Option<String>,
}

impl StoreSpec {
    /// Parse a store URL like `s3://bucket/prefix` or `file:///path`.
    pub fn parse(url: &str) -> StoreResult<Self> {
        let url = url::Url::parse(url).map_err(|e| StoreError::InvalidSpec {
            spec: url.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = url.scheme().to_string();
        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|s| s.to_string());
        let prefix = url.path().trim_start_matches('/').to_string();

        let region = url
            .query_pairs()
            .find(|(k, _)| k == "region")
            .map(|(_, v)| v.to_string());

        Ok(Self {
            scheme,
            bucket,
            prefix,
            region,
        })
    }

    pub fn is_memory(&self) -> bool {
        self.scheme == "memory"
    }

    pub fn is_file(&self) -> bool {
        self.scheme == "file"
    }
}
