//! Publisher configuration.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use modvault_core::FinalizeConfig;
use modvault_integrations::WebhookConfig;

/// SQLite path that selects an in-memory database.
pub const MEMORY_DATABASE: &str = ":memory:";

/// Everything needed to stand up a publisher.
///
/// ```yaml
/// artifacts: s3://mods-bucket/modvault?region=eu-west-1
/// database: /var/lib/modvault/records.db
/// webhooks:
///   urls: [https://hooks.example.com/modvault]
///   token: secret
/// finalize:
///   write_policy: strict
///   scan_policy: degrade
///   stage_timeout_secs: 120
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Artifact store URL (`memory://`, `file:///path`, `s3://bucket/prefix`).
    #[serde(default = "default_artifacts")]
    pub artifacts: String,

    /// SQLite database path, or `:memory:`.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub webhooks: WebhookConfig,

    #[serde(default)]
    pub finalize: FinalizeConfig,
}

fn default_artifacts() -> String {
    "memory://".to_string()
}

fn default_database() -> String {
    MEMORY_DATABASE.to_string()
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            artifacts: default_artifacts(),
            database: default_database(),
            webhooks: WebhookConfig::default(),
            finalize: FinalizeConfig::default(),
        }
    }
}

impl PublisherConfig {
    /// Load from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read publisher config: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("failed to parse publisher config YAML")
    }

    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `MODVAULT_ARTIFACTS_URL` | Artifact store URL |
    /// | `MODVAULT_DATABASE` | SQLite path |
    /// | `MODVAULT_WEBHOOK_URLS` | Comma-separated webhook URLs |
    /// | `MODVAULT_WEBHOOK_TOKEN` | Webhook bearer token |
    ///
    /// Finalize settings come from [`FinalizeConfig::from_env`].
    pub fn from_env() -> Self {
        Self {
            artifacts: std::env::var("MODVAULT_ARTIFACTS_URL")
                .unwrap_or_else(|_| default_artifacts()),
            database: std::env::var("MODVAULT_DATABASE").unwrap_or_else(|_| default_database()),
            webhooks: WebhookConfig::from_env(),
            finalize: FinalizeConfig::from_env(),
        }
    }

    pub fn with_artifacts(mut self, url: impl Into<String>) -> Self {
        self.artifacts = url.into();
        self
    }

    pub fn with_database(mut self, path: impl Into<String>) -> Self {
        self.database = path.into();
        self
    }

    pub fn with_finalize(mut self, finalize: FinalizeConfig) -> Self {
        self.finalize = finalize;
        self
    }

    pub fn uses_memory_database(&self) -> bool {
        self.database == MEMORY_DATABASE
    }
}
