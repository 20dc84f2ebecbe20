//! Key naming conventions for package storage.
//!
//! # Key Schema
//!
//! ```text
//! {base}/staging/{mod_id}/{upload_id}/parts/{part:05}      # Staged multipart parts
//! {base}/staging/{mod_id}/{upload_id}/{mod_name}.smod      # Completed staged package
//! {base}/mods/{mod_id}/versions/{version}/{mod_name}-{version}.smod
//! {base}/mods/{mod_id}/versions/{version}/targets/{target}/{mod_name}-{target}-{version}.smod
//! ```
//!
//! Everything a version owns lives under its version prefix, so one prefix
//! delete removes the canonical package and every target artifact.

use object_store::path::Path;

use modvault_core::StagedUpload;

/// Builder for storage keys.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    /// Base prefix (e.g., "modvault/packages")
    base_prefix: String,
}

impl KeyBuilder {
    /// Create a new key builder with the given base prefix.
    pub fn new(base_prefix: impl Into<String>) -> Self {
        let prefix = base_prefix.into().trim_matches('/').to_string();
        Self {
            base_prefix: prefix,
        }
    }

    /// Everything staged for one upload.
    ///
    /// Returns: `{base}/staging/{mod_id}/{upload_id}`
    pub fn upload_prefix(&self, upload: &StagedUpload) -> Path {
        self.join(format!(
            "staging/{}/{}",
            Self::sanitize_id(&upload.mod_id),
            Self::sanitize_id(&upload.upload_id)
        ))
    }

    pub fn parts_prefix(&self, upload: &StagedUpload) -> Path {
        Path::from(format!("{}/parts", self.upload_prefix(upload)))
    }

    /// Key for one multipart part. Zero-padded so lexical order is part order.
    pub fn part_key(&self, upload: &StagedUpload, part: u32) -> Path {
        Path::from(format!("{}/parts/{:05}", self.upload_prefix(upload), part))
    }

    /// Key for the completed staged package.
    ///
    /// Returns: `{base}/staging/{mod_id}/{upload_id}/{mod_name}.smod`
    pub fn staged_key(&self, upload: &StagedUpload) -> Path {
        Path::from(format!(
            "{}/{}.smod",
            self.upload_prefix(upload),
            Self::sanitize_id(&upload.mod_name)
        ))
    }

    /// Root prefix of one version.
    ///
    /// Returns: `{base}/mods/{mod_id}/versions/{version}`
    pub fn version_prefix(&self, mod_id: &str, version: &str) -> Path {
        self.join(format!(
            "mods/{}/versions/{}",
            Self::sanitize_id(mod_id),
            Self::sanitize_id(version)
        ))
    }

    /// Canonical key of a renamed package.
    pub fn version_key(&self, mod_id: &str, mod_name: &str, version: &str) -> Path {
        Path::from(format!(
            "{}/{}-{}.smod",
            self.version_prefix(mod_id, version),
            Self::sanitize_id(mod_name),
            Self::sanitize_id(version)
        ))
    }

    /// Key of one per-target artifact.
    pub fn target_key(&self, mod_id: &str, mod_name: &str, version: &str, target: &str) -> Path {
        let target = Self::sanitize_id(target);
        Path::from(format!(
            "{}/targets/{}/{}-{}-{}.smod",
            self.version_prefix(mod_id, version),
            target,
            Self::sanitize_id(mod_name),
            target,
            Self::sanitize_id(version)
        ))
    }

    fn join(&self, rest: String) -> Path {
        if self.base_prefix.is_empty() {
            Path::from(rest)
        } else {
            Path::from(format!("{}/{}", self.base_prefix, rest))
        }
    }

    /// Replace characters that are unsafe in a key segment.
    fn sanitize_id(id: &str) -> String {
        id.chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '+') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}
