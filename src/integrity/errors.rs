//! Integrity monitor errors

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::store::StoreError;

/// Result type for integrity operations
pub type IntegrityResult<T> = Result<T, IntegrityError>;

#[derive(Debug, Clone, Error)]
pub enum IntegrityError {
    /// The monitor refuses to start against an unreachable store
    #[error("Store is not reachable: {0}")]
    Unreachable(StoreError),

    #[error("Incident log {path}: {reason}")]
    Log { path: String, reason: String },
}

impl IntegrityError {
    pub fn log_at(path: &Path, source: io::Error) -> Self {
        IntegrityError::Log {
            path: path.display().to_string(),
            reason: source.to_string(),
        }
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            IntegrityError::Unreachable(_) => "PV_INTEGRITY_UNREACHABLE",
            IntegrityError::Log { .. } => "PV_INTEGRITY_LOG",
        }
    }
}
