//! Backup-specific error types
//!
//! Backup errors never put the store at risk: a failed export leaves no
//! artifact behind and changes nothing in the database.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::store::StoreError;
use crate::tools::ToolError;

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Backup error
#[derive(Debug, Clone, Error)]
pub enum BackupError {
    #[error("I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Store error during backup: {0}")]
    Store(#[from] StoreError),

    #[error("Native dump failed: {0}")]
    Tool(#[from] ToolError),

    #[error("Invalid backup schedule '{pattern}': {reason}")]
    Schedule { pattern: String, reason: String },
}

impl BackupError {
    /// Creates an I/O error at a specific path
    pub fn io_at(path: &Path, source: io::Error) -> Self {
        BackupError::Io {
            path: path.display().to_string(),
            reason: source.to_string(),
        }
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            BackupError::Io { .. } => "PV_BACKUP_IO",
            BackupError::Store(_) => "PV_BACKUP_STORE",
            BackupError::Tool(_) => "PV_BACKUP_TOOL",
            BackupError::Schedule { .. } => "PV_BACKUP_SCHEDULE",
        }
    }
}
