//! # Tool Errors

use thiserror::Error;

/// Result type for external tool invocations
pub type ToolResult<T> = Result<T, ToolError>;

/// Failures running a dump/restore executable
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Failed to start {tool}: {reason}")]
    Spawn { tool: String, reason: String },

    #[error("{tool} exited with status {status}: {stderr}")]
    ExitStatus {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("{tool} did not finish within {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("I/O error while running {tool}: {reason}")]
    Io { tool: String, reason: String },
}

impl ToolError {
    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::Spawn { .. } => "PV_TOOL_SPAWN",
            ToolError::ExitStatus { .. } => "PV_TOOL_EXIT",
            ToolError::Timeout { .. } => "PV_TOOL_TIMEOUT",
            ToolError::Io { .. } => "PV_TOOL_IO",
        }
    }
}
