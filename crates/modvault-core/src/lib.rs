//! Version finalization for uploaded mod packages.
//!
//! This crate turns a completed multipart upload into a published version:
//!
//! - Validates the package and checks it belongs to the owning mod
//! - Persists the version, its dependencies and its per-target rows
//! - Splits the package into one artifact per target platform
//! - Moves the package to its canonical key
//! - Auto-approves trusted content or queues a virus scan
//!
//! Any failure after the first write runs a compensating cleanup, so a failed
//! attempt leaves no rows and no blobs behind.
//!
//! Storage, persistence, validation and messaging are traits
//! ([`ArtifactStore`], [`RecordStore`], [`PackageValidator`], [`JobQueue`],
//! [`NotificationSink`]); concrete backends live in sibling crates.
//!
//! # Quick Start
//!
//! ```no_run
//! use modvault_core::{
//!     Collaborators, FinalizationOrchestrator, FinalizeConfig, FinalizeContext, Mod, NewVersion,
//!     Stability,
//! };
//!
//! # async fn example(collaborators: Collaborators, owner: Mod) -> anyhow::Result<()> {
//! let orchestrator = FinalizationOrchestrator::new(collaborators, FinalizeConfig::from_env());
//! let request = NewVersion {
//!     changelog: "Fix crash on load".to_string(),
//!     stability: Stability::Release,
//! };
//!
//! let response = orchestrator
//!     .finalize_upload(&FinalizeContext::background(), &owner, "upload-id", &request)
//!     .await?;
//! println!("published {} ({:?})", response.version.version, response.review);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `MODVAULT_WRITE_POLICY` | `strict` (default) or `best_effort` |
//! | `MODVAULT_SCAN_POLICY` | `degrade` (default) or `roll_back` |
//! | `MODVAULT_EXTRACT_METADATA` | Collect package metadata (default: true) |
//! | `MODVAULT_STRICT_VALIDATION` | Run strict package checks (default: true) |
//! | `MODVAULT_FINALIZE_TIMEOUT` | Deadline in seconds when the caller sets none |
//! | `MODVAULT_NOTIFY_MAX_RETRIES` | Notification delivery retries (default: 3) |

pub mod approval;
pub mod config;
pub mod context;
pub mod error;
pub mod finalize;
pub mod queue;
pub mod store;
pub mod types;
pub mod validate;

// Re-export main types
pub use approval::{is_auto_approvable, TRUSTED_OBJECT_TYPE};
pub use config::{FinalizeConfig, RetryPolicy, ScanSubmissionPolicy, WritePolicy};
pub use context::{CancelHandle, FinalizeContext, Interrupt};
pub use error::{
    FinalizeError, FinalizeResult, QueueError, RecordError, RecordResult, StoreError, StoreResult,
    ValidationError,
};
pub use finalize::{
    Collaborators, Compensation, CompensationPlan, CompensationReport, FinalizationOrchestrator,
    Pipeline, Stage, UndoStep,
};
pub use queue::{DeliveryOutcome, JobQueue, NotificationDispatcher, NotificationSink};
pub use store::{ArtifactStore, RecordStore};
pub use types::{
    ContentObject, CreateVersionResponse, Mod, ModInfo, NewVersion, PackageFormat, ReviewStatus,
    Stability, StagedUpload, TargetArtifact, Version, VersionDependency, VersionNumbers,
    VersionTarget,
};
pub use validate::{ExtractOptions, PackageValidator};
