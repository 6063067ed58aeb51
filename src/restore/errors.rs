//! Restore-specific error types
//!
//! A restore error means nothing was committed: the preflight failed, the
//! artifact could not be read, or the replay transaction was rolled back.
//! Row-level failures are not errors; they are counted in the outcome.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::store::StoreError;
use crate::tools::ToolError;

/// Result type for restore operations
pub type RestoreResult<T> = Result<T, RestoreError>;

/// Restore error
#[derive(Debug, Clone, Error)]
pub enum RestoreError {
    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Store is not reachable, restore not attempted: {0}")]
    Preflight(StoreError),

    #[error("I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Replay failed and was rolled back: {0}")]
    Store(StoreError),

    #[error("Native restore failed: {0}")]
    Tool(#[from] ToolError),
}

impl RestoreError {
    pub fn io_at(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return RestoreError::NotFound(path.display().to_string());
        }
        RestoreError::Io {
            path: path.display().to_string(),
            reason: source.to_string(),
        }
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            RestoreError::NotFound(_) => "PV_RESTORE_NOT_FOUND",
            RestoreError::Preflight(_) => "PV_RESTORE_PREFLIGHT",
            RestoreError::Io { .. } => "PV_RESTORE_IO",
            RestoreError::Store(_) => "PV_RESTORE_STORE",
            RestoreError::Tool(_) => "PV_RESTORE_TOOL",
        }
    }
}
