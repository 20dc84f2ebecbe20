//! Storage collaborators: object storage for blobs, relational store for rows.
//!
//! The pipeline owns no storage of its own. Both traits are implemented
//! outside this crate (`modvault-storage`, `modvault-db`) and by in-memory
//! fakes in tests.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{RecordResult, StoreResult};
use crate::types::{Mod, StagedUpload, TargetArtifact, Version, VersionDependency, VersionTarget};

/// Object storage holding staged, canonical and per-target package blobs.
///
/// # Idempotency
///
/// Every delete succeeds when the object or prefix is already absent.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Complete a staged multipart upload so its content becomes addressable.
    async fn complete_multipart_upload(&self, upload: &StagedUpload) -> StoreResult<()>;

    /// Read the full staged package.
    async fn get_object(&self, upload: &StagedUpload) -> StoreResult<Bytes>;

    /// Delete everything staged for the upload.
    async fn delete_object(&self, upload: &StagedUpload) -> StoreResult<()>;

    /// Extract one target's build from the package and upload it.
    async fn split_and_upload_target(
        &self,
        package: &Bytes,
        mod_id: &str,
        mod_name: &str,
        version: &str,
        target: &str,
    ) -> StoreResult<TargetArtifact>;

    /// Move the staged package to its canonical per-version key.
    ///
    /// Returns the new key.
    async fn rename_version(&self, upload: &StagedUpload, version: &str) -> StoreResult<String>;

    /// Delete the version's root prefix (canonical package and all targets).
    async fn delete_version(&self, mod_id: &str, mod_name: &str, version: &str)
        -> StoreResult<()>;

    /// Delete one target artifact.
    async fn delete_target_artifact(
        &self,
        mod_id: &str,
        mod_name: &str,
        version: &str,
        target: &str,
    ) -> StoreResult<()>;
}

/// Relational persistence for version, dependency and target rows.
///
/// `save_*` are upserts. `force_delete_*` delete unconditionally, ignoring
/// any in-use guard, and succeed when the row is absent.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up a mod.
    async fn get_mod_by_id(&self, id: &str) -> RecordResult<Option<Mod>>;

    /// Persist changes to a mod.
    async fn save_mod(&self, owner: &Mod) -> RecordResult<()>;

    /// Insert a new version. Fails on a duplicate (mod, version string).
    async fn create_version(&self, version: &Version) -> RecordResult<()>;

    /// Update an existing version.
    async fn save_version(&self, version: &Version) -> RecordResult<()>;

    /// Upsert a dependency keyed by (version, mod, optional).
    async fn save_dependency(&self, dependency: &VersionDependency) -> RecordResult<()>;

    /// Upsert a target keyed by (version, target name).
    async fn save_target(&self, target: &VersionTarget) -> RecordResult<()>;

    async fn force_delete_dependency(&self, dependency: &VersionDependency) -> RecordResult<()>;

    async fn force_delete_target(&self, target: &VersionTarget) -> RecordResult<()>;

    async fn force_delete_version(&self, version: &Version) -> RecordResult<()>;
}
