//! Package validator collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::ModInfo;

/// Strict-mode flags handed to the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Collect the free-form metadata blob.
    #[serde(default = "default_true")]
    pub with_metadata: bool,

    /// Run structural and consistency checks.
    #[serde(default = "default_true")]
    pub with_validation: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            with_metadata: true,
            with_validation: true,
        }
    }
}

/// Parses raw package bytes into structured mod metadata.
#[async_trait]
pub trait PackageValidator: Send + Sync {
    /// Extract mod info.
    ///
    /// `expected_reference` selects which plugin descriptor to read when the
    /// package carries several. The returned `mod_reference` is whatever the
    /// package declares; comparing it to the owning mod is the caller's job.
    async fn extract(
        &self,
        package: &[u8],
        options: ExtractOptions,
        expected_reference: &str,
    ) -> Result<ModInfo, ValidationError>;
}
