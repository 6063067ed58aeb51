//! CLI-specific error types

use std::io;

use thiserror::Error;

use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::restore::RestoreError;
use crate::subsystem::BootstrapError;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdout, runtime)
    IoError,
    /// The store could not be reached
    ConnectFailed,
    BackupFailed,
    RestoreFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "PV_CLI_CONFIG_ERROR",
            Self::IoError => "PV_CLI_IO_ERROR",
            Self::ConnectFailed => "PV_CLI_CONNECT_FAILED",
            Self::BackupFailed => "PV_CLI_BACKUP_FAILED",
            Self::RestoreFailed => "PV_CLI_RESTORE_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug, Error)]
#[error("{}: {message}", .code.code())]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn connect_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConnectFailed, msg)
    }

    /// Get the error code
    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(format!("{} ({})", e, e.code()))
    }
}

impl From<BootstrapError> for CliError {
    fn from(e: BootstrapError) -> Self {
        Self::connect_failed(format!("{} ({})", e, e.code()))
    }
}

impl From<BackupError> for CliError {
    fn from(e: BackupError) -> Self {
        Self::new(CliErrorCode::BackupFailed, format!("{} ({})", e, e.code()))
    }
}

impl From<RestoreError> for CliError {
    fn from(e: RestoreError) -> Self {
        Self::new(CliErrorCode::RestoreFailed, format!("{} ({})", e, e.code()))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn test_display_includes_code() {
        let err: CliError = RestoreError::Preflight(StoreError::NotConnected).into();
        assert_eq!(err.code(), CliErrorCode::RestoreFailed);
        let display = err.to_string();
        assert!(display.starts_with("PV_CLI_RESTORE_FAILED: "));
        assert!(display.contains("PV_RESTORE_PREFLIGHT"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: CliError = ConfigError::Parse("eof".into()).into();
        assert_eq!(err.code_str(), "PV_CLI_CONFIG_ERROR");
    }
}
