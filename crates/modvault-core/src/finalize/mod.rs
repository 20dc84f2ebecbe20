//! The finalization pipeline.
//!
//! Turns a staged multipart upload into a committed version: validate the
//! package, persist the version with its dependencies and targets, split the
//! package per target, move it to its canonical key, then hand off to review.
//!
//! ```text
//! Uploading -> Validated -> Persisted -> TargetsDeclared -> Separated -> Renamed -> Committed
//!      \___________\____________\______________\_______________\___________\_________> RolledBack
//! ```
//!
//! Failures before the version row is attempted, and a version conflict,
//! only discard the staged upload. Every other failure from the version
//! insert onwards runs the full [`CompensationPlan`].

pub mod compensate;
mod dispatch;

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::approval::{check_format, check_reference, is_auto_approvable};
use crate::config::{FinalizeConfig, WritePolicy};
use crate::context::FinalizeContext;
use crate::error::{FinalizeError, FinalizeResult, RecordError, RecordResult};
use crate::queue::{JobQueue, NotificationDispatcher, NotificationSink};
use crate::store::{ArtifactStore, RecordStore};
use crate::types::{
    CreateVersionResponse, Mod, ModInfo, NewVersion, StagedUpload, Version, VersionDependency,
    VersionNumbers, VersionTarget,
};
use crate::validate::PackageValidator;

pub use compensate::{Compensation, CompensationPlan, CompensationReport, UndoStep};

/// Pipeline stage. Each value names the work currently being done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Uploading,
    Validated,
    Persisted,
    TargetsDeclared,
    Separated,
    Renamed,
    Committed,
    RolledBack,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Validated => "validated",
            Self::Persisted => "persisted",
            Self::TargetsDeclared => "targets_declared",
            Self::Separated => "separated",
            Self::Renamed => "renamed",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// The forward successor, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Uploading => Some(Self::Validated),
            Self::Validated => Some(Self::Persisted),
            Self::Persisted => Some(Self::TargetsDeclared),
            Self::TargetsDeclared => Some(Self::Separated),
            Self::Separated => Some(Self::Renamed),
            Self::Renamed => Some(Self::Committed),
            Self::Committed | Self::RolledBack => None,
        }
    }

    /// Whether the version row may exist while in this stage.
    pub fn has_version_row(self) -> bool {
        !matches!(self, Self::Uploading | Self::Validated | Self::RolledBack)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one attempt's position in the state machine.
#[derive(Debug)]
pub struct Pipeline {
    stage: Stage,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::start()
    }
}

impl Pipeline {
    pub fn start() -> Self {
        Self {
            stage: Stage::Uploading,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move forward. Stages are never skipped.
    pub fn advance(&mut self, next: Stage) {
        debug_assert_eq!(self.stage.next(), Some(next), "illegal stage transition");
        debug!(from = %self.stage, to = %next, "stage transition");
        self.stage = next;
    }

    /// Enter the absorbing failure state.
    pub fn roll_back(&mut self) {
        debug!(from = %self.stage, "rolling back");
        self.stage = Stage::RolledBack;
    }
}

/// The collaborators the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub records: Arc<dyn RecordStore>,
    pub validator: Arc<dyn PackageValidator>,
    pub jobs: Arc<dyn JobQueue>,
    pub notifications: Arc<dyn NotificationSink>,
}

/// Drives a staged upload through the pipeline.
///
/// # Concurrency
///
/// Callers must hold an exclusive lease on `(mod, version)` for the whole
/// call. Two concurrent attempts for the same pair would race on the version
/// prefix and one's compensation could delete the other's blobs.
pub struct FinalizationOrchestrator {
    artifacts: Arc<dyn ArtifactStore>,
    records: Arc<dyn RecordStore>,
    validator: Arc<dyn PackageValidator>,
    jobs: Arc<dyn JobQueue>,
    notifier: NotificationDispatcher,
    config: FinalizeConfig,
}

impl FinalizationOrchestrator {
    pub fn new(collaborators: Collaborators, config: FinalizeConfig) -> Self {
        let notifier =
            NotificationDispatcher::new(collaborators.notifications, config.notify.clone());
        Self {
            artifacts: collaborators.artifacts,
            records: collaborators.records,
            validator: collaborators.validator,
            jobs: collaborators.jobs,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &FinalizeConfig {
        &self.config
    }

    /// A compensation runner over this orchestrator's stores.
    pub fn compensation(&self) -> Compensation {
        Compensation::new(Arc::clone(&self.records), Arc::clone(&self.artifacts))
    }

    /// Finalize the staged upload `upload_id` as a new version of `owner`.
    ///
    /// On success every declared target carries its artifact key, hash and
    /// size, and the version carries its canonical key. On failure nothing
    /// written by this call survives, apart from blobs whose compensating
    /// delete itself failed (those are logged).
    pub async fn finalize_upload(
        &self,
        ctx: &FinalizeContext,
        owner: &Mod,
        upload_id: &str,
        request: &NewVersion,
    ) -> FinalizeResult<CreateVersionResponse> {
        let ctx = match self.config.timeout() {
            Some(timeout) if ctx.deadline().is_none() => ctx.clone().with_timeout(timeout),
            _ => ctx.clone(),
        };
        let upload = StagedUpload::for_mod(owner, upload_id);
        let span = info_span!("finalize_upload", mod_id = %owner.id, upload_id = %upload_id);

        async move {
            let result = self.run(&ctx, owner, &upload, request).await;
            match &result {
                Ok(response) => info!(
                    version_id = %response.version.id,
                    version = %response.version.version,
                    auto_approved = response.auto_approved,
                    "version finalized"
                ),
                Err(e) => warn!(error = %e, kind = e.kind(), "finalize failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        ctx: &FinalizeContext,
        owner: &Mod,
        upload: &StagedUpload,
        request: &NewVersion,
    ) -> FinalizeResult<CreateVersionResponse> {
        let mut pipeline = Pipeline::start();

        let package = match self.receive(ctx, upload).await {
            Ok(package) => package,
            Err(err) => return Err(self.discard_staged(&mut pipeline, upload, err).await),
        };

        pipeline.advance(Stage::Validated);
        let info = match self.validate(ctx, owner, &package).await {
            Ok(info) => info,
            Err(err) => return Err(self.discard_staged(&mut pipeline, upload, err).await),
        };
        let auto_approved = is_auto_approvable(&info.objects);

        pipeline.advance(Stage::Persisted);
        let mut version = build_version(owner, request, &info, auto_approved);
        info!(version = %version.version, version_id = %version.id, "creating version");
        match self
            .call(
                ctx,
                Stage::Persisted,
                self.records.create_version(&version),
                FinalizeError::Persistence,
            )
            .await
        {
            Ok(()) => {}
            // The conflicting row belongs to an earlier publish.
            Err(err @ FinalizeError::Persistence(RecordError::Conflict { .. })) => {
                return Err(self.discard_staged(&mut pipeline, upload, err).await)
            }
            // The row may have been written before the call was cut short.
            Err(err) => {
                return Err(self
                    .roll_back(&mut pipeline, &info, owner, upload, &version, err)
                    .await)
            }
        }

        let targets = match self
            .complete_version(ctx, &mut pipeline, upload, &package, &info, &mut version)
            .await
        {
            Ok(targets) => targets,
            Err(err) => {
                return Err(self
                    .roll_back(&mut pipeline, &info, owner, upload, &version, err)
                    .await)
            }
        };

        pipeline.advance(Stage::Committed);
        let review = match self.post_commit(ctx, owner, &version).await {
            Ok(review) => review,
            Err(err) => {
                return Err(self
                    .roll_back(&mut pipeline, &info, owner, upload, &version, err)
                    .await)
            }
        };

        Ok(CreateVersionResponse {
            auto_approved,
            version,
            targets,
            review,
        })
    }

    /// Complete the multipart upload and read the package back.
    async fn receive(&self, ctx: &FinalizeContext, upload: &StagedUpload) -> FinalizeResult<Bytes> {
        info!("completing multipart upload");
        self.call(
            ctx,
            Stage::Uploading,
            self.artifacts.complete_multipart_upload(upload),
            FinalizeError::Storage,
        )
        .await?;

        self.call(
            ctx,
            Stage::Uploading,
            self.artifacts.get_object(upload),
            FinalizeError::Storage,
        )
        .await
    }

    async fn validate(
        &self,
        ctx: &FinalizeContext,
        owner: &Mod,
        package: &Bytes,
    ) -> FinalizeResult<ModInfo> {
        info!("validating mod");
        let info = self
            .call(
                ctx,
                Stage::Validated,
                self.validator
                    .extract(package, self.config.extract, &owner.mod_reference),
                FinalizeError::Validation,
            )
            .await?;

        check_reference(owner, &info)?;
        check_format(&info)?;
        Ok(info)
    }

    /// Everything between the version row and the committed state.
    async fn complete_version(
        &self,
        ctx: &FinalizeContext,
        pipeline: &mut Pipeline,
        upload: &StagedUpload,
        package: &Bytes,
        info: &ModInfo,
        version: &mut Version,
    ) -> FinalizeResult<Vec<VersionTarget>> {
        for dependency in declared_dependencies(info, &version.id) {
            self.write(
                ctx,
                Stage::Persisted,
                "dependency",
                self.records.save_dependency(&dependency),
            )
            .await?;
        }

        // Metadata extraction may be switched off; the column then stays empty.
        if !info.metadata.is_null() {
            match serde_json::to_string(&info.metadata) {
                Ok(json) => {
                    version.metadata = Some(json);
                    self.write(
                        ctx,
                        Stage::Persisted,
                        "metadata",
                        self.records.save_version(version),
                    )
                    .await?;
                }
                Err(e) => {
                    let err = FinalizeError::Serialization(e);
                    warn!(error = %err, version_id = %version.id, "skipping version metadata");
                }
            }
        }

        pipeline.advance(Stage::TargetsDeclared);
        let mut targets: Vec<VersionTarget> = info
            .targets
            .iter()
            .map(|name| VersionTarget::declared(&version.id, name))
            .collect();
        for target in &targets {
            self.write(
                ctx,
                Stage::TargetsDeclared,
                "target",
                self.records.save_target(target),
            )
            .await?;
        }

        pipeline.advance(Stage::Separated);
        for target in &mut targets {
            info!(target = %target.target_name, version = %version.version, "separating mod");
            let artifact = self
                .call(
                    ctx,
                    Stage::Separated,
                    self.artifacts.split_and_upload_target(
                        package,
                        &upload.mod_id,
                        &upload.mod_name,
                        &version.version,
                        &target.target_name,
                    ),
                    |source| FinalizeError::Separation {
                        target: target.target_name.clone(),
                        source,
                    },
                )
                .await?;

            target.key = Some(artifact.key);
            target.hash = Some(artifact.hash);
            target.size = Some(artifact.size);
            self.call(
                ctx,
                Stage::Separated,
                self.records.save_target(target),
                FinalizeError::Persistence,
            )
            .await?;
        }

        pipeline.advance(Stage::Renamed);
        let key = self
            .call(
                ctx,
                Stage::Renamed,
                self.artifacts.rename_version(upload, &version.version),
                FinalizeError::Rename,
            )
            .await?;
        version.key = Some(key);
        self.call(
            ctx,
            Stage::Renamed,
            self.records.save_version(version),
            FinalizeError::Persistence,
        )
        .await?;

        Ok(targets)
    }

    /// Run an external call under the context, mapping both failure kinds.
    async fn call<T, E, F>(
        &self,
        ctx: &FinalizeContext,
        stage: Stage,
        fut: F,
        wrap: impl FnOnce(E) -> FinalizeError,
    ) -> FinalizeResult<T>
    where
        F: Future<Output = Result<T, E>>,
    {
        match ctx.guard(fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(wrap(e)),
            Err(interrupt) => Err(interrupt.at(stage)),
        }
    }

    /// A relational write subject to the write policy.
    ///
    /// Only dependency rows, declared target rows and metadata go through
    /// here. Artifact and key saves are always strict. Interrupts abort
    /// regardless of policy.
    async fn write<F>(
        &self,
        ctx: &FinalizeContext,
        stage: Stage,
        what: &'static str,
        fut: F,
    ) -> FinalizeResult<()>
    where
        F: Future<Output = RecordResult<()>>,
    {
        match self.call(ctx, stage, fut, FinalizeError::Persistence).await {
            Err(err @ FinalizeError::Persistence(_))
                if self.config.write_policy == WritePolicy::BestEffort =>
            {
                warn!(error = %err, what, %stage, "ignoring failed write");
                Ok(())
            }
            other => other,
        }
    }

    /// Cleanup for failures that leave no version row of this attempt.
    async fn discard_staged(
        &self,
        pipeline: &mut Pipeline,
        upload: &StagedUpload,
        err: FinalizeError,
    ) -> FinalizeError {
        warn!(error = %err, stage = %pipeline.stage(), "discarding staged upload");
        if let Err(e) = self.artifacts.delete_object(upload).await {
            warn!(error = %e, upload_id = %upload.upload_id, "failed to delete staged upload");
        }
        pipeline.roll_back();
        err
    }

    /// Cleanup for failures after the version row exists.
    async fn roll_back(
        &self,
        pipeline: &mut Pipeline,
        info: &ModInfo,
        owner: &Mod,
        upload: &StagedUpload,
        version: &Version,
        err: FinalizeError,
    ) -> FinalizeError {
        warn!(
            error = %err,
            stage = %pipeline.stage(),
            version_id = %version.id,
            "compensating failed finalize"
        );
        let plan = CompensationPlan::new(info, owner, version, upload);
        let report = self.compensation().run(&plan).await;
        if !report.is_clean() {
            warn!(
                failed = ?report.failed,
                version_id = %version.id,
                "compensation left residue"
            );
        }
        pipeline.roll_back();
        err
    }
}

/// Required dependencies first, then optional, each in key order.
pub(crate) fn declared_dependencies(info: &ModInfo, version_id: &str) -> Vec<VersionDependency> {
    let required = info.dependencies.iter().map(|(m, c)| (m, c, false));
    let optional = info.optional_dependencies.iter().map(|(m, c)| (m, c, true));

    required
        .chain(optional)
        .map(|(mod_id, condition, optional)| VersionDependency {
            version_id: version_id.to_string(),
            mod_id: mod_id.clone(),
            condition: condition.clone(),
            optional,
        })
        .collect()
}

fn build_version(
    owner: &Mod,
    request: &NewVersion,
    info: &ModInfo,
    approved: bool,
) -> Version {
    let numbers = VersionNumbers::from(&info.semver);
    Version {
        id: Uuid::new_v4().to_string(),
        mod_id: owner.id.clone(),
        version: info.version.clone(),
        sml_version: info.sml_version.clone(),
        changelog: request.changelog.clone(),
        stability: request.stability,
        mod_reference: info.mod_reference.clone(),
        hash: info.hash.clone(),
        size: info.size,
        version_major: numbers.major,
        version_minor: numbers.minor,
        version_patch: numbers.patch,
        approved,
        key: None,
        metadata: None,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::types::{PackageFormat, Stability};

    #[test]
    fn test_stage_walk() {
        let mut stage = Stage::Uploading;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(
            seen,
            vec![
                Stage::Uploading,
                Stage::Validated,
                Stage::Persisted,
                Stage::TargetsDeclared,
                Stage::Separated,
                Stage::Renamed,
                Stage::Committed,
            ]
        );
        assert_eq!(Stage::RolledBack.next(), None);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::TargetsDeclared.to_string(), "targets_declared");
        assert_eq!(Stage::RolledBack.to_string(), "rolled_back");
    }

    #[test]
    fn test_version_row_window() {
        assert!(!Stage::Validated.has_version_row());
        assert!(Stage::Persisted.has_version_row());
        assert!(Stage::Committed.has_version_row());
        assert!(!Stage::RolledBack.has_version_row());
    }

    #[test]
    fn test_pipeline_rolls_back_from_any_stage() {
        let mut pipeline = Pipeline::start();
        pipeline.advance(Stage::Validated);
        pipeline.advance(Stage::Persisted);
        pipeline.roll_back();
        assert_eq!(pipeline.stage(), Stage::RolledBack);
    }

    #[test]
    fn test_build_version_copies_package_fields() {
        let owner = Mod {
            id: "m1".to_string(),
            name: "ModA".to_string(),
            mod_reference: "ModA".to_string(),
            last_published_at: None,
        };
        let info = ModInfo {
            mod_reference: "ModA".to_string(),
            version: "2.4.1-beta.1".to_string(),
            semver: semver::Version::parse("2.4.1-beta.1").unwrap(),
            sml_version: "^3.7.0".to_string(),
            hash: "abc".to_string(),
            size: 42,
            format: PackageFormat::MultiTargetPlugin,
            targets: vec!["Windows".to_string()],
            objects: Vec::new(),
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
            metadata: serde_json::Value::Null,
        };
        let request = NewVersion {
            changelog: "fixes".to_string(),
            stability: Stability::Beta,
        };

        let v = build_version(&owner, &request, &info, false);

        assert_eq!(v.mod_id, "m1");
        assert_eq!(v.version, "2.4.1-beta.1");
        assert_eq!((v.version_major, v.version_minor, v.version_patch), (2, 4, 1));
        assert_eq!(v.changelog, "fixes");
        assert_eq!(v.size, 42);
        assert!(!v.approved);
        assert!(v.key.is_none());
        assert!(Uuid::parse_str(&v.id).is_ok());
    }

    #[test]
    fn test_declared_dependencies_required_first() {
        let mut dependencies = BTreeMap::new();
        dependencies.insert("SML".to_string(), "^3.7.0".to_string());
        let mut optional_dependencies = BTreeMap::new();
        optional_dependencies.insert("Alpha".to_string(), "*".to_string());
        let info = ModInfo {
            mod_reference: "ModA".to_string(),
            version: "1.0.0".to_string(),
            semver: semver::Version::new(1, 0, 0),
            sml_version: String::new(),
            hash: String::new(),
            size: 0,
            format: PackageFormat::MultiTargetPlugin,
            targets: Vec::new(),
            objects: Vec::new(),
            dependencies,
            optional_dependencies,
            metadata: serde_json::Value::Null,
        };

        let deps = declared_dependencies(&info, "v1");

        assert_eq!(deps.len(), 2);
        assert_eq!((deps[0].mod_id.as_str(), deps[0].optional), ("SML", false));
        assert_eq!((deps[1].mod_id.as_str(), deps[1].optional), ("Alpha", true));
        assert!(deps.iter().all(|d| d.version_id == "v1"));
    }
}
