//! Error types for the finalization pipeline and its collaborators.

use crate::finalize::Stage;

/// Object storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Object or staged upload not found.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Network or I/O error talking to the backend.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// The package archive could not be read or rewritten.
    #[error("archive error: {message}")]
    Archive { message: String },

    /// The package holds no files for the requested target.
    #[error("target not present in package: {target}")]
    TargetMissing { target: String },

    /// Invalid store specification (URL parsing failed).
    #[error("invalid store spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    /// Any other backend failure.
    #[error("object store error: {message}")]
    Backend { message: String },
}

impl StoreError {
    /// Returns true if this error indicates the object was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Relational persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// Row not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness or foreign key violation.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Driver error.
    #[error("database error: {0}")]
    Database(String),
}

/// Package content failed structural or semantic checks.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Archive is unreadable or violates layout rules.
    #[error("malformed package: {reason}")]
    Malformed { reason: String },

    /// No plugin descriptor was found.
    #[error("missing plugin descriptor for {reference}")]
    MissingDescriptor { reference: String },

    /// The descriptor names a different mod than the one being published.
    #[error("mod reference mismatch: expected {expected}, package declares {actual}")]
    ReferenceMismatch { expected: String, actual: String },

    /// The declared version is not valid semver.
    #[error("invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    /// Per-target descriptors disagree with each other.
    #[error("inconsistent targets: {reason}")]
    InconsistentTargets { reason: String },
}

/// Job queue and notification sink errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The receiver refused the job or event.
    #[error("rejected: {message}")]
    Rejected { message: String },

    /// The receiver could not be reached.
    #[error("unavailable: {message}")]
    Unavailable { message: String },
}

/// Finalization errors.
///
/// Every variant except `Serialization` is returned to the caller only after
/// the cleanup owed by the failing stage has run.
#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    /// Multipart completion or blob read failed.
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),

    /// Package content failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Package is not in the multi-target layout.
    #[error("mods must be in the multi-target format (found {found})")]
    Format { found: String },

    /// A required relational write failed.
    #[error("persistence error: {0}")]
    Persistence(#[source] RecordError),

    /// Splitting or uploading a target artifact failed.
    #[error("failed to separate target {target}: {source}")]
    Separation {
        target: String,
        #[source]
        source: StoreError,
    },

    /// Moving the staged package to its canonical key failed.
    #[error("failed to rename staged package: {0}")]
    Rename(#[source] StoreError),

    /// Metadata could not be encoded. Logged and skipped, never returned.
    #[error("failed to serialize metadata: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Virus scan submission failed under the roll-back policy.
    #[error("failed to submit scan job: {0}")]
    ScanSubmission(#[source] QueueError),

    /// The caller cancelled the request.
    #[error("cancelled during {stage}")]
    Cancelled { stage: Stage },

    /// The request deadline elapsed.
    #[error("deadline exceeded during {stage}")]
    DeadlineExceeded { stage: Stage },
}

impl FinalizeError {
    /// Stable short name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Validation(_) => "validation",
            Self::Format { .. } => "format",
            Self::Persistence(_) => "persistence",
            Self::Separation { .. } => "separation",
            Self::Rename(_) => "rename",
            Self::Serialization(_) => "serialization",
            Self::ScanSubmission(_) => "scan_submission",
            Self::Cancelled { .. } => "cancelled",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }

    /// Whether a client may retry the same upload later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Separation { .. }
                | Self::Rename(_)
                | Self::ScanSubmission(_)
                | Self::Cancelled { .. }
                | Self::DeadlineExceeded { .. }
        )
    }
}

/// Result type for finalization.
pub type FinalizeResult<T> = Result<T, FinalizeError>;

/// Result type for object storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for relational operations.
pub type RecordResult<T> = Result<T, RecordError>;
