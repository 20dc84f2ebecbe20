//! Object store implementation of ArtifactStore.
//!
//! Supports S3 and S3-compatible stores, the local filesystem, and an
//! in-memory backend via the `object_store` crate.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};
use tracing::{debug, info};

use modvault_core::{ArtifactStore, StagedUpload, StoreError, StoreResult, TargetArtifact};

use crate::archive::{sha256_hex, split_target};
use crate::{KeyBuilder, StoreSpec};

/// Map a backend error, keeping not-found distinguishable.
fn from_object_store(err: object_store::Error, key: &Path) -> StoreError {
    match err {
        object_store::Error::NotFound { .. } => StoreError::NotFound {
            key: key.to_string(),
        },
        other => StoreError::Backend {
            message: other.to_string(),
        },
    }
}

/// Package store backed by `object_store`.
pub struct ObjectStoreArtifactStore {
    inner: Arc<dyn ObjectStore>,
    keys: KeyBuilder,
}

impl ObjectStoreArtifactStore {
    /// Create a store from a parsed spec.
    pub async fn from_spec(spec: &StoreSpec) -> StoreResult<Self> {
        let inner: Arc<dyn ObjectStore> = match spec.scheme.as_str() {
            "memory" => Arc::new(object_store::memory::InMemory::new()),
            "file" => {
                let path = if let Some(bucket) = &spec.bucket {
                    format!("/{}/{}", bucket, spec.prefix)
                } else if spec.prefix.is_empty() {
                    "/tmp/modvault-store".to_string()
                } else {
                    format!("/{}", spec.prefix)
                };
                std::fs::create_dir_all(&path).map_err(|e| StoreError::Io {
                    message: format!("failed to create store directory {}: {}", path, e),
                })?;
                Arc::new(
                    object_store::local::LocalFileSystem::new_with_prefix(&path).map_err(|e| {
                        StoreError::Io {
                            message: format!("failed to create local store at {}: {}", path, e),
                        }
                    })?,
                )
            }
            "s3" => {
                let bucket = spec
                    .bucket
                    .as_ref()
                    .ok_or_else(|| StoreError::InvalidSpec {
                        spec: format!("s3://{:?}/{}", spec.bucket, spec.prefix),
                        reason: "S3 URL must include bucket name".to_string(),
                    })?;

                let mut builder = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_allow_http(false);

                if let Some(region) = &spec.region {
                    builder = builder.with_region(region);
                }

                Arc::new(builder.build().map_err(|e| StoreError::Io {
                    message: format!("failed to create S3 client: {}", e),
                })?)
            }
            scheme => {
                return Err(StoreError::InvalidSpec {
                    spec: spec.scheme.clone(),
                    reason: format!("unsupported scheme: {}", scheme),
                })
            }
        };

        // The file backend is rooted at the prefix already.
        let base = if spec.is_file() { "" } else { spec.prefix.as_str() };

        Ok(Self {
            inner,
            keys: KeyBuilder::new(base),
        })
    }

    /// Create a store from a URL string.
    pub async fn from_url(url: &str) -> StoreResult<Self> {
        let spec = StoreSpec::parse(url)?;
        Self::from_spec(&spec).await
    }

    /// Create an in-memory store for testing.
    pub fn memory() -> Self {
        Self::memory_with_prefix("")
    }

    /// Create an in-memory store with a prefix for testing.
    pub fn memory_with_prefix(prefix: &str) -> Self {
        Self {
            inner: Arc::new(object_store::memory::InMemory::new()),
            keys: KeyBuilder::new(prefix),
        }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Upload one part of a multipart upload.
    ///
    /// Parts are concatenated in part-number order on completion.
    pub async fn stage_part(&self, upload: &StagedUpload, part: u32, data: Bytes) -> StoreResult<()> {
        let key = self.keys.part_key(upload, part);
        self.write(&key, data).await
    }

    pub async fn exists(&self, key: &Path) -> StoreResult<bool> {
        match self.inner.head(key).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(from_object_store(e, key)),
        }
    }

    /// Every key under `prefix`, sorted.
    pub async fn list_keys(&self, prefix: &Path) -> StoreResult<Vec<Path>> {
        let entries: Vec<_> = self
            .inner
            .list(Some(prefix))
            .try_collect()
            .await
            .map_err(|e| StoreError::Io {
                message: format!("failed to list {}: {}", prefix, e),
            })?;

        let mut keys: Vec<Path> = entries.into_iter().map(|meta| meta.location).collect();
        keys.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
        Ok(keys)
    }

    /// Read a whole object.
    pub async fn read(&self, key: &Path) -> StoreResult<Bytes> {
        let result = self
            .inner
            .get(key)
            .await
            .map_err(|e| from_object_store(e, key))?;

        result.bytes().await.map_err(|e| StoreError::Io {
            message: format!("failed to read {}: {}", key, e),
        })
    }

    async fn write(&self, key: &Path, data: Bytes) -> StoreResult<()> {
        self.inner
            .put(key, PutPayload::from_bytes(data))
            .await
            .map_err(|e| from_object_store(e, key))?;
        Ok(())
    }

    /// Delete one object. Absent objects are not an error.
    async fn remove(&self, key: &Path) -> StoreResult<()> {
        match self.inner.delete(key).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(from_object_store(e, key)),
        }
    }

    /// Delete every object under `prefix`.
    async fn remove_prefix(&self, prefix: &Path) -> StoreResult<()> {
        let keys = self.list_keys(prefix).await?;
        for key in &keys {
            self.remove(key).await?;
        }
        debug!(prefix = %prefix, removed = keys.len(), "prefix deleted");
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for ObjectStoreArtifactStore {
    async fn complete_multipart_upload(&self, upload: &StagedUpload) -> StoreResult<()> {
        let staged = self.keys.staged_key(upload);
        let parts = self.list_keys(&self.keys.parts_prefix(upload)).await?;

        if parts.is_empty() {
            // Completing twice is fine; completing nothing is not.
            return if self.exists(&staged).await? {
                Ok(())
            } else {
                Err(StoreError::NotFound {
                    key: staged.to_string(),
                })
            };
        }

        let mut package = Vec::new();
        for part in &parts {
            package.extend_from_slice(&self.read(part).await?);
        }
        let size = package.len();
        self.write(&staged, Bytes::from(package)).await?;

        for part in &parts {
            self.remove(part).await?;
        }

        info!(key = %staged, parts = parts.len(), size, "multipart upload completed");
        Ok(())
    }

    async fn get_object(&self, upload: &StagedUpload) -> StoreResult<Bytes> {
        self.read(&self.keys.staged_key(upload)).await
    }

    async fn delete_object(&self, upload: &StagedUpload) -> StoreResult<()> {
        self.remove_prefix(&self.keys.upload_prefix(upload)).await
    }

    async fn split_and_upload_target(
        &self,
        package: &Bytes,
        mod_id: &str,
        mod_name: &str,
        version: &str,
        target: &str,
    ) -> StoreResult<TargetArtifact> {
        let artifact = split_target(package, target)?;
        let hash = sha256_hex(&artifact);
        let size = artifact.len() as u64;

        let key = self.keys.target_key(mod_id, mod_name, version, target);
        self.write(&key, Bytes::from(artifact)).await?;

        debug!(key = %key, size, "target artifact uploaded");
        Ok(TargetArtifact {
            key: key.to_string(),
            hash,
            size,
        })
    }

    async fn rename_version(&self, upload: &StagedUpload, version: &str) -> StoreResult<String> {
        let from = self.keys.staged_key(upload);
        let to = self
            .keys
            .version_key(&upload.mod_id, &upload.mod_name, version);

        let data = match self.read(&from).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                // A previous attempt already moved it.
                if self.exists(&to).await? {
                    return Ok(to.to_string());
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        self.write(&to, data).await?;
        self.remove(&from).await?;
        Ok(to.to_string())
    }

    async fn delete_version(&self, mod_id: &str, _mod_name: &str, version: &str) -> StoreResult<()> {
        self.remove_prefix(&self.keys.version_prefix(mod_id, version))
            .await
    }

    async fn delete_target_artifact(
        &self,
        mod_id: &str,
        mod_name: &str,
        version: &str,
        target: &str,
    ) -> StoreResult<()> {
        self.remove(&self.keys.target_key(mod_id, mod_name, version, target))
            .await
    }
}
