//! Post-commit hand-off: publish approved versions, queue scans for the rest.

use chrono::Utc;
use tracing::{info, warn};

use crate::config::ScanSubmissionPolicy;
use crate::context::FinalizeContext;
use crate::error::{FinalizeError, FinalizeResult};
use crate::types::{Mod, ReviewStatus, Version};

use super::{FinalizationOrchestrator, Stage};

impl FinalizationOrchestrator {
    /// Runs once the version is committed.
    ///
    /// Only a scan submission failure under [`ScanSubmissionPolicy::RollBack`]
    /// returns an error; the caller compensates in that case.
    pub(super) async fn post_commit(
        &self,
        ctx: &FinalizeContext,
        owner: &Mod,
        version: &Version,
    ) -> FinalizeResult<ReviewStatus> {
        if version.approved {
            self.touch_last_published(ctx, owner).await;
            // Detached: dropping the handle does not abort the task.
            let _delivery = self.notifier.dispatch(version.clone());
            return Ok(ReviewStatus::AutoApproved);
        }

        info!(version_id = %version.id, "submitting version job for virus scan");
        let submitted = self
            .call(
                ctx,
                Stage::Committed,
                self.jobs.submit_virus_scan(&owner.id, &version.id, true),
                FinalizeError::ScanSubmission,
            )
            .await;

        match submitted {
            Ok(()) => Ok(ReviewStatus::ScanQueued),
            Err(err) => match self.config.scan_policy {
                ScanSubmissionPolicy::Degrade => {
                    warn!(
                        error = %err,
                        version_id = %version.id,
                        "scan job not queued, version awaits manual review"
                    );
                    Ok(ReviewStatus::ScanSubmissionFailed {
                        reason: err.to_string(),
                    })
                }
                ScanSubmissionPolicy::RollBack => Err(err),
            },
        }
    }

    /// Best-effort bump of the owning mod's publish timestamp.
    async fn touch_last_published(&self, ctx: &FinalizeContext, owner: &Mod) {
        let current = match ctx.guard(self.records.get_mod_by_id(&owner.id)).await {
            Ok(Ok(Some(current))) => current,
            Ok(Ok(None)) => owner.clone(),
            Ok(Err(e)) => {
                warn!(error = %e, mod_id = %owner.id, "failed to reload mod");
                owner.clone()
            }
            Err(interrupt) => {
                warn!(?interrupt, mod_id = %owner.id, "skipping last published update");
                return;
            }
        };

        let updated = Mod {
            last_published_at: Some(Utc::now()),
            ..current
        };
        match ctx.guard(self.records.save_mod(&updated)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, mod_id = %owner.id, "failed to update last published"),
            Err(interrupt) => {
                warn!(?interrupt, mod_id = %owner.id, "skipping last published update")
            }
        }
    }
}
