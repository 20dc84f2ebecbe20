//! Publisher: the orchestrator wired to concrete collaborators.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use modvault_core::{
    Collaborators, CreateVersionResponse, FinalizationOrchestrator, FinalizeContext,
    FinalizeResult, Mod, NewVersion,
};
use modvault_db::{SqliteJobQueue, SqliteRecordStore};
use modvault_integrations::WebhookNotifier;
use modvault_storage::ObjectStoreArtifactStore;
use modvault_validate::ArchiveValidator;

use crate::config::PublisherConfig;

/// A ready-to-use publishing pipeline.
pub struct Publisher {
    orchestrator: FinalizationOrchestrator,
    artifacts: Arc<ObjectStoreArtifactStore>,
    records: Arc<SqliteRecordStore>,
    jobs: Arc<SqliteJobQueue>,
}

impl Publisher {
    /// Open every backend named in `config`.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn open(config: PublisherConfig) -> Result<Self> {
        let artifacts = ObjectStoreArtifactStore::from_url(&config.artifacts)
            .await
            .with_context(|| format!("failed to open artifact store: {}", config.artifacts))?;

        let records = if config.uses_memory_database() {
            SqliteRecordStore::memory()
        } else {
            SqliteRecordStore::open(Path::new(&config.database))
        }
        .with_context(|| format!("failed to open record store: {}", config.database))?;

        let notifier = WebhookNotifier::new(config.webhooks.clone())
            .context("failed to create webhook notifier")?;

        let artifacts = Arc::new(artifacts);
        let jobs = Arc::new(records.job_queue());
        let records = Arc::new(records);

        let orchestrator = FinalizationOrchestrator::new(
            Collaborators {
                artifacts: artifacts.clone(),
                records: records.clone(),
                validator: Arc::new(ArchiveValidator::new()),
                jobs: jobs.clone(),
                notifications: Arc::new(notifier),
            },
            config.finalize.clone(),
        );

        info!(
            artifacts = %config.artifacts,
            database = %config.database,
            webhooks = config.webhooks.urls.len(),
            "publisher ready"
        );

        Ok(Self {
            orchestrator,
            artifacts,
            records,
            jobs,
        })
    }

    /// Open a publisher configured from the environment.
    pub async fn from_env() -> Result<Self> {
        Self::open(PublisherConfig::from_env()).await
    }

    /// Register (or update) the mod that uploads publish into.
    pub fn register_mod(&self, owner: &Mod) -> Result<()> {
        self.records
            .insert_mod(owner)
            .with_context(|| format!("failed to register mod {}", owner.id))
    }

    /// Finalize a staged upload into a published version.
    pub async fn publish(
        &self,
        ctx: &FinalizeContext,
        owner: &Mod,
        upload_id: &str,
        request: &NewVersion,
    ) -> FinalizeResult<CreateVersionResponse> {
        self.orchestrator
            .finalize_upload(ctx, owner, upload_id, request)
            .await
    }

    pub fn orchestrator(&self) -> &FinalizationOrchestrator {
        &self.orchestrator
    }

    pub fn artifacts(&self) -> &ObjectStoreArtifactStore {
        &self.artifacts
    }

    pub fn records(&self) -> &SqliteRecordStore {
        &self.records
    }

    pub fn jobs(&self) -> &SqliteJobQueue {
        &self.jobs
    }
}
