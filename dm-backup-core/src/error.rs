//! Error types for the backup pipeline.
//!
//! Variants split into two groups:
//! - node-level (`Upstream`, `Timeout`, `NoVersionFound`): caught by the walker, logged, and
//!   the failing folder or item is skipped
//! - run-level (everything else): abort the run and surface to the caller

use std::time::Duration;

use thiserror::Error;

use crate::contract::UpstreamError;

pub type Result<T> = std::result::Result<T, BackupError>;

/// Which part of a scoped request could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Hub,
    Project,
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeKind::Hub => f.write_str("hub"),
            ScopeKind::Project => f.write_str("project"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    /// No access credential was supplied
    #[error("access token is missing")]
    AuthMissing,

    /// The requested hub or project is not visible to the credential
    #[error("{kind} not found: {id}")]
    ScopeNotFound { kind: ScopeKind, id: String },

    /// A call to the remote service failed
    #[error("upstream error during {operation}: {source}")]
    Upstream {
        operation: &'static str,
        #[source]
        source: UpstreamError,
    },

    /// A guarded call did not complete within its deadline
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The item has no version with a downloadable storage location
    #[error("no downloadable version found for item {item_id}")]
    NoVersionFound { item_id: String },

    /// Writing the archive trailer failed; the output is not a valid archive
    #[error("failed to finalize archive: {0}")]
    ArchiveFinalization(#[source] zip::result::ZipError),

    /// The archive encoder rejected an entry
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Local I/O failed (output sink or spool file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled before it completed
    #[error("backup cancelled")]
    Cancelled,
}

impl BackupError {
    pub fn upstream(operation: &'static str, source: UpstreamError) -> Self {
        BackupError::Upstream { operation, source }
    }

    /// Errors the walker may swallow for a single folder or item.
    pub fn is_node_level(&self) -> bool {
        matches!(
            self,
            BackupError::Upstream { .. }
                | BackupError::Timeout { .. }
                | BackupError::NoVersionFound { .. }
        )
    }
}
