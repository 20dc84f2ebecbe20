//! Data model shared by the pipeline and its collaborators.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A mod owned by the surrounding catalog.
///
/// The pipeline only reads it and bumps `last_published_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mod {
    /// Catalog ID.
    pub id: String,

    /// Display name, also used in storage keys.
    pub name: String,

    /// Canonical mod reference (e.g., "FicsitRemoteMonitoring").
    pub mod_reference: String,

    /// When a version of this mod was last published.
    #[serde(default)]
    pub last_published_at: Option<DateTime<Utc>>,
}

/// Release channel requested by the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    Alpha,
    Beta,
    Release,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Release => "release",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "alpha" => Some(Self::Alpha),
            "beta" => Some(Self::Beta),
            "release" => Some(Self::Release),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uploader-supplied fields for the new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVersion {
    pub changelog: String,
    pub stability: Stability,
}

/// Package layout reported by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageFormat {
    /// One archive with a build variant per target platform.
    MultiTargetPlugin,

    /// Legacy layout with a single build at the archive root.
    SingleTargetPlugin,
}

impl PackageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultiTargetPlugin => "multi_target_plugin",
            Self::SingleTargetPlugin => "single_target_plugin",
        }
    }
}

impl std::fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content object inside the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentObject {
    /// Path inside the archive.
    pub path: String,

    /// Object type (e.g., "pak", "binary").
    #[serde(rename = "type")]
    pub object_type: String,
}

impl ContentObject {
    pub fn new(path: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            object_type: object_type.into(),
        }
    }
}

/// Validator output. Transient, never persisted as-is.
#[derive(Debug, Clone)]
pub struct ModInfo {
    /// Mod reference declared by the package.
    pub mod_reference: String,

    /// Version string as declared.
    pub version: String,

    /// Parsed semantic version.
    pub semver: semver::Version,

    /// Declared SML version constraint (empty if none).
    pub sml_version: String,

    /// Content hash of the whole package (SHA-256 hex).
    pub hash: String,

    /// Package size in bytes.
    pub size: u64,

    /// Package layout.
    pub format: PackageFormat,

    /// Declared target names.
    pub targets: Vec<String>,

    /// Content objects.
    pub objects: Vec<ContentObject>,

    /// Required dependencies: mod reference -> version constraint.
    pub dependencies: BTreeMap<String, String>,

    /// Optional dependencies: mod reference -> version constraint.
    pub optional_dependencies: BTreeMap<String, String>,

    /// Free-form metadata blob.
    pub metadata: serde_json::Value,
}

/// Decomposed semantic version numbers stored on a version row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionNumbers {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl From<&semver::Version> for VersionNumbers {
    fn from(v: &semver::Version) -> Self {
        Self {
            major: v.major,
            minor: v.minor,
            patch: v.patch,
        }
    }
}

impl VersionNumbers {
    /// Parse and decompose a version string.
    pub fn parse(version: &str) -> Result<Self, semver::Error> {
        semver::Version::parse(version).map(|v| Self::from(&v))
    }
}

/// A published (or in-flight) version row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub mod_id: String,
    pub version: String,
    pub sml_version: String,
    pub changelog: String,
    pub stability: Stability,

    /// Denormalized copy of the owning mod's reference.
    pub mod_reference: String,

    pub hash: String,
    pub size: u64,
    pub version_major: u64,
    pub version_minor: u64,
    pub version_patch: u64,
    pub approved: bool,

    /// Canonical storage key. Set only after the staged package is renamed.
    #[serde(default)]
    pub key: Option<String>,

    /// Serialized validator metadata.
    #[serde(default)]
    pub metadata: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// One declared dependency of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDependency {
    pub version_id: String,

    /// Referenced mod.
    pub mod_id: String,

    /// Version constraint.
    pub condition: String,

    pub optional: bool,
}

/// One per-target artifact of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionTarget {
    pub version_id: String,
    pub target_name: String,

    /// Populated after the target is split and uploaded.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl VersionTarget {
    /// A declared target without artifact data.
    pub fn declared(version_id: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            version_id: version_id.into(),
            target_name: target_name.into(),
            key: None,
            hash: None,
            size: None,
        }
    }

    /// Whether key, hash and size are all populated.
    pub fn is_complete(&self) -> bool {
        self.key.as_deref().is_some_and(|k| !k.is_empty())
            && self.hash.as_deref().is_some_and(|h| !h.is_empty())
            && self.size.is_some()
    }
}

/// Staged multipart upload coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpload {
    pub mod_id: String,
    pub mod_name: String,
    pub upload_id: String,
}

impl StagedUpload {
    pub fn new(
        mod_id: impl Into<String>,
        mod_name: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> Self {
        Self {
            mod_id: mod_id.into(),
            mod_name: mod_name.into(),
            upload_id: upload_id.into(),
        }
    }

    pub fn for_mod(owner: &Mod, upload_id: impl Into<String>) -> Self {
        Self::new(owner.id.clone(), owner.name.clone(), upload_id)
    }
}

/// Result of splitting and uploading one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetArtifact {
    pub key: String,
    pub hash: String,
    pub size: u64,
}

/// How the committed version will be reviewed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewStatus {
    /// Every object was trusted; the version is live.
    AutoApproved,

    /// A virus scan job was queued.
    ScanQueued,

    /// The version is committed but the scan job could not be queued.
    ScanSubmissionFailed { reason: String },
}

/// Successful finalization.
#[derive(Debug, Clone)]
pub struct CreateVersionResponse {
    pub auto_approved: bool,
    pub version: Version,
    pub targets: Vec<VersionTarget>,
    pub review: ReviewStatus,
}
