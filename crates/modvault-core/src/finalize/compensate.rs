//! Compensation: undo every write of a failed finalize attempt.
//!
//! The plan is a pure function of what the attempt could have written. Rows
//! go before blobs, so an interrupted compensation can leave an orphaned blob
//! but never a row pointing at a deleted blob. Every step is idempotent.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{ArtifactStore, RecordStore};
use crate::types::{Mod, ModInfo, StagedUpload, Version, VersionDependency, VersionTarget};

use super::declared_dependencies;

/// One inverse operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoStep {
    DeleteDependency(VersionDependency),
    DeleteTarget(VersionTarget),
    DeleteVersion(Box<Version>),
    DeleteStagedUpload(StagedUpload),
    DeleteVersionPrefix {
        mod_id: String,
        mod_name: String,
        version: String,
    },
    DeleteTargetArtifact {
        mod_id: String,
        mod_name: String,
        version: String,
        target: String,
    },
}

impl UndoStep {
    /// Whether the step removes a relational row.
    pub fn is_row(&self) -> bool {
        matches!(
            self,
            Self::DeleteDependency(_) | Self::DeleteTarget(_) | Self::DeleteVersion(_)
        )
    }

    fn describe(&self) -> String {
        match self {
            Self::DeleteDependency(d) => format!("dependency {} of {}", d.mod_id, d.version_id),
            Self::DeleteTarget(t) => format!("target {} of {}", t.target_name, t.version_id),
            Self::DeleteVersion(v) => format!("version {}", v.id),
            Self::DeleteStagedUpload(u) => format!("staged upload {}", u.upload_id),
            Self::DeleteVersionPrefix { mod_id, version, .. } => {
                format!("version prefix {}/{}", mod_id, version)
            }
            Self::DeleteTargetArtifact {
                mod_id,
                version,
                target,
                ..
            } => format!("target artifact {}/{}/{}", mod_id, version, target),
        }
    }
}

/// Ordered undo steps for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationPlan {
    steps: Vec<UndoStep>,
}

impl CompensationPlan {
    pub fn new(info: &ModInfo, owner: &Mod, version: &Version, upload: &StagedUpload) -> Self {
        let mut steps: Vec<UndoStep> = declared_dependencies(info, &version.id)
            .into_iter()
            .map(UndoStep::DeleteDependency)
            .collect();

        steps.extend(
            info.targets
                .iter()
                .map(|t| UndoStep::DeleteTarget(VersionTarget::declared(&version.id, t))),
        );

        steps.push(UndoStep::DeleteVersion(Box::new(version.clone())));

        steps.push(UndoStep::DeleteStagedUpload(upload.clone()));
        steps.push(UndoStep::DeleteVersionPrefix {
            mod_id: owner.id.clone(),
            mod_name: owner.name.clone(),
            version: version.version.clone(),
        });
        steps.extend(info.targets.iter().map(|t| UndoStep::DeleteTargetArtifact {
            mod_id: owner.id.clone(),
            mod_name: owner.name.clone(),
            version: version.version.clone(),
            target: t.clone(),
        }));

        Self { steps }
    }

    pub fn steps(&self) -> &[UndoStep] {
        &self.steps
    }
}

/// What a compensation run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    pub attempted: usize,

    /// Descriptions of steps that failed.
    pub failed: Vec<String>,
}

impl CompensationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Executes compensation plans against the stores.
#[derive(Clone)]
pub struct Compensation {
    records: Arc<dyn RecordStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl Compensation {
    pub fn new(records: Arc<dyn RecordStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { records, artifacts }
    }

    /// Run every step, continuing past failures.
    pub async fn run(&self, plan: &CompensationPlan) -> CompensationReport {
        let mut report = CompensationReport::default();

        for step in plan.steps() {
            report.attempted += 1;
            if let Err(message) = self.apply(step).await {
                warn!(step = %step.describe(), error = %message, "compensation step failed");
                report.failed.push(step.describe());
            }
        }

        debug!(
            attempted = report.attempted,
            failed = report.failed.len(),
            "compensation finished"
        );
        report
    }

    async fn apply(&self, step: &UndoStep) -> Result<(), String> {
        match step {
            UndoStep::DeleteDependency(d) => self
                .records
                .force_delete_dependency(d)
                .await
                .map_err(|e| e.to_string()),
            UndoStep::DeleteTarget(t) => self
                .records
                .force_delete_target(t)
                .await
                .map_err(|e| e.to_string()),
            UndoStep::DeleteVersion(v) => self
                .records
                .force_delete_version(v)
                .await
                .map_err(|e| e.to_string()),
            UndoStep::DeleteStagedUpload(u) => self
                .artifacts
                .delete_object(u)
                .await
                .map_err(|e| e.to_string()),
            UndoStep::DeleteVersionPrefix {
                mod_id,
                mod_name,
                version,
            } => self
                .artifacts
                .delete_version(mod_id, mod_name, version)
                .await
                .map_err(|e| e.to_string()),
            UndoStep::DeleteTargetArtifact {
                mod_id,
                mod_name,
                version,
                target,
            } => self
                .artifacts
                .delete_target_artifact(mod_id, mod_name, version, target)
                .await
                .map_err(|e| e.to_string()),
        }
    }
}
