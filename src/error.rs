//! Error taxonomy for the engine.
//!
//! Every fallible operation returns [`EngramError`]. The taxonomy is a closed
//! set: callers can rely on [`ErrorCode`] for stable machine-readable codes
//! and on [`ErrorKind`] for the coarse classification an HTTP layer would map
//! to a status family.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngramError>;

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    Internal,
    Capacity,
    RateLimit,
}

/// Stable machine-readable error codes.
///
/// Codes never change once released; new failures get new codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ProjectNotFound,
    SessionNotFound,
    VersionNotFound,
    KeepitNotFound,
    CompositionNotFound,
    FileNotFound,
    AlreadyRegistered,
    OperationInProgress,
    VersionInUse,
    ResourceLocked,
    LockTimeout,
    InvalidSettings,
    ValidationFailed,
    InsufficientMessages,
    CannotDeleteOriginal,
    ParseError,
    InvalidImport,
    InvalidFormat,
    CompressionFailed,
    SummarizerFailed,
    ManifestCorruption,
    FilesystemError,
    DiskSpaceExhausted,
    ModelRateLimit,
}

impl ErrorCode {
    /// The wire spelling of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProjectNotFound => "project_not_found",
            Self::SessionNotFound => "session_not_found",
            Self::VersionNotFound => "version_not_found",
            Self::KeepitNotFound => "keepit_not_found",
            Self::CompositionNotFound => "composition_not_found",
            Self::FileNotFound => "file_not_found",
            Self::AlreadyRegistered => "already_registered",
            Self::OperationInProgress => "operation_in_progress",
            Self::VersionInUse => "version_in_use",
            Self::ResourceLocked => "resource_locked",
            Self::LockTimeout => "lock_timeout",
            Self::InvalidSettings => "invalid_settings",
            Self::ValidationFailed => "validation_failed",
            Self::InsufficientMessages => "insufficient_messages",
            Self::CannotDeleteOriginal => "cannot_delete_original",
            Self::ParseError => "parse_error",
            Self::InvalidImport => "invalid_import",
            Self::InvalidFormat => "invalid_format",
            Self::CompressionFailed => "compression_failed",
            Self::SummarizerFailed => "summarizer_failed",
            Self::ManifestCorruption => "manifest_corruption",
            Self::FilesystemError => "filesystem_error",
            Self::DiskSpaceExhausted => "disk_space_exhausted",
            Self::ModelRateLimit => "model_rate_limit",
        }
    }

    /// Coarse classification for this code.
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::ProjectNotFound
            | Self::SessionNotFound
            | Self::VersionNotFound
            | Self::KeepitNotFound
            | Self::CompositionNotFound
            | Self::FileNotFound => ErrorKind::NotFound,
            Self::AlreadyRegistered
            | Self::OperationInProgress
            | Self::VersionInUse
            | Self::ResourceLocked
            | Self::LockTimeout => ErrorKind::Conflict,
            Self::InvalidSettings
            | Self::ValidationFailed
            | Self::InsufficientMessages
            | Self::CannotDeleteOriginal
            | Self::ParseError
            | Self::InvalidImport
            | Self::InvalidFormat => ErrorKind::BadRequest,
            Self::CompressionFailed
            | Self::SummarizerFailed
            | Self::ManifestCorruption
            | Self::FilesystemError => ErrorKind::Internal,
            Self::DiskSpaceExhausted => ErrorKind::Capacity,
            Self::ModelRateLimit => ErrorKind::RateLimit,
        }
    }

    /// Suggested HTTP status for a caller that needs one.
    pub fn status_hint(self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::BadRequest => 400,
            ErrorKind::Internal => 500,
            ErrorKind::Capacity => 507,
            ErrorKind::RateLimit => 429,
        }
    }
}

/// The engine error type. One variant per failure mode of spec-level
/// operations; variants carry the offending identifiers so callers can
/// report them without string parsing.
#[derive(Debug, Error)]
pub enum EngramError {
    #[error("project not found: {project_id}")]
    ProjectNotFound { project_id: String },

    #[error("session not found: {session_id} (project {project_id})")]
    SessionNotFound {
        project_id: String,
        session_id: String,
    },

    #[error("version not found: {version_id} (session {session_id})")]
    VersionNotFound {
        session_id: String,
        version_id: String,
    },

    #[error("keepit marker not found: {marker_id}")]
    KeepitNotFound { marker_id: String },

    #[error("composition not found: {composition_id}")]
    CompositionNotFound { composition_id: String },

    #[error("file missing on disk: {path}")]
    FileNotFound { path: PathBuf },

    #[error("session already registered: {session_id}")]
    AlreadyRegistered { session_id: String },

    #[error("{operation} already in progress for session {session_id}")]
    OperationInProgress {
        session_id: String,
        operation: String,
    },

    #[error("version {version_id} is referenced by {} composition(s)", composition_ids.len())]
    VersionInUse {
        version_id: String,
        composition_ids: Vec<String>,
    },

    #[error("resource locked: {path}")]
    ResourceLocked { path: PathBuf },

    #[error("timed out acquiring {what} lock")]
    LockTimeout { what: String },

    #[error("invalid settings: {reason}")]
    InvalidSettings { reason: String },

    #[error("manifest validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("session {session_id} has {count} message(s); at least {required} required")]
    InsufficientMessages {
        session_id: String,
        count: usize,
        required: usize,
    },

    #[error("the original transcript cannot be deleted")]
    CannotDeleteOriginal,

    #[error("transcript parse error: {reason}")]
    ParseError { reason: String },

    #[error("invalid import: {reason}")]
    InvalidImport { reason: String },

    #[error("invalid output format: {format}")]
    InvalidFormat { format: String },

    #[error("compression failed for session {session_id}: {reason}")]
    CompressionFailed { session_id: String, reason: String },

    #[error("summarizer failed: {reason}")]
    SummarizerFailed { reason: String },

    #[error("manifest corrupted at {path}: {reason}")]
    ManifestCorruption { path: PathBuf, reason: String },

    #[error("filesystem error at {path}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("disk space exhausted writing {path}")]
    DiskSpaceExhausted { path: PathBuf },

    #[error("rate limited by model {model}")]
    ModelRateLimit { model: String },
}

impl EngramError {
    /// Stable machine code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ProjectNotFound { .. } => ErrorCode::ProjectNotFound,
            Self::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            Self::VersionNotFound { .. } => ErrorCode::VersionNotFound,
            Self::KeepitNotFound { .. } => ErrorCode::KeepitNotFound,
            Self::CompositionNotFound { .. } => ErrorCode::CompositionNotFound,
            Self::FileNotFound { .. } => ErrorCode::FileNotFound,
            Self::AlreadyRegistered { .. } => ErrorCode::AlreadyRegistered,
            Self::OperationInProgress { .. } => ErrorCode::OperationInProgress,
            Self::VersionInUse { .. } => ErrorCode::VersionInUse,
            Self::ResourceLocked { .. } => ErrorCode::ResourceLocked,
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
            Self::InvalidSettings { .. } => ErrorCode::InvalidSettings,
            Self::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            Self::InsufficientMessages { .. } => ErrorCode::InsufficientMessages,
            Self::CannotDeleteOriginal => ErrorCode::CannotDeleteOriginal,
            Self::ParseError { .. } => ErrorCode::ParseError,
            Self::InvalidImport { .. } => ErrorCode::InvalidImport,
            Self::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            Self::CompressionFailed { .. } => ErrorCode::CompressionFailed,
            Self::SummarizerFailed { .. } => ErrorCode::SummarizerFailed,
            Self::ManifestCorruption { .. } => ErrorCode::ManifestCorruption,
            Self::Filesystem { .. } => ErrorCode::FilesystemError,
            Self::DiskSpaceExhausted { .. } => ErrorCode::DiskSpaceExhausted,
            Self::ModelRateLimit { .. } => ErrorCode::ModelRateLimit,
        }
    }

    /// Coarse kind, see [`ErrorCode::kind`].
    pub fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    /// Whether a caller may retry the operation unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::LockTimeout
                | ErrorCode::OperationInProgress
                | ErrorCode::ResourceLocked
                | ErrorCode::ModelRateLimit
        )
    }

    /// Wrap an I/O error with the path it happened on, promoting
    /// out-of-space conditions to their own code.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound { path },
            std::io::ErrorKind::StorageFull => Self::DiskSpaceExhausted { path },
            _ => Self::Filesystem { path, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(ErrorCode::VersionInUse.as_str(), "version_in_use");
        assert_eq!(ErrorCode::LockTimeout.as_str(), "lock_timeout");
        assert_eq!(ErrorCode::ManifestCorruption.as_str(), "manifest_corruption");
    }

    #[test]
    fn kinds_map_to_status_families() {
        assert_eq!(ErrorCode::SessionNotFound.status_hint(), 404);
        assert_eq!(ErrorCode::OperationInProgress.status_hint(), 409);
        assert_eq!(ErrorCode::InsufficientMessages.status_hint(), 400);
        assert_eq!(ErrorCode::DiskSpaceExhausted.status_hint(), 507);
        assert_eq!(ErrorCode::ModelRateLimit.status_hint(), 429);
    }

    #[test]
    fn io_promotes_not_found_and_storage_full() {
        let nf = EngramError::io("/tmp/x", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(nf.code(), ErrorCode::FileNotFound);

        let full =
            EngramError::io("/tmp/x", std::io::Error::from(std::io::ErrorKind::StorageFull));
        assert_eq!(full.code(), ErrorCode::DiskSpaceExhausted);
    }

    #[test]
    fn lock_errors_are_retriable() {
        let e = EngramError::LockTimeout { what: "manifest".into() };
        assert!(e.is_retriable());
        let e = EngramError::CannotDeleteOriginal;
        assert!(!e.is_retriable());
    }
}
