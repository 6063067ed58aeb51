//! Native dump/restore invocation

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use super::errors::{ToolError, ToolResult};
use crate::config::{BackupConfig, DatabaseConfig};

/// Environment variable the tools read the password from
const PASSWORD_ENV: &str = "PGPASSWORD";

/// Runs the native dump and restore executables against the configured
/// database. Credentials travel in the child's environment, never on its
/// command line.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    host: String,
    port: u16,
    user: String,
    database: String,
    password: Option<String>,
    dump_binary: String,
    restore_binary: String,
    run_timeout: Duration,
}

impl ToolRunner {
    pub fn from_config(database: &DatabaseConfig, backups: &BackupConfig) -> Self {
        Self {
            host: database.host.clone(),
            port: database.port,
            user: database.user.clone(),
            database: database.database.clone(),
            password: database.password(),
            dump_binary: backups.dump_binary.clone(),
            restore_binary: backups.restore_binary.clone(),
            run_timeout: backups.tool_run_timeout(),
        }
    }

    pub fn dump_binary(&self) -> &str {
        &self.dump_binary
    }

    pub fn restore_binary(&self) -> &str {
        &self.restore_binary
    }

    fn connection_args(&self) -> Vec<String> {
        vec![
            "-h".to_string(),
            self.host.clone(),
            "-p".to_string(),
            self.port.to_string(),
            "-U".to_string(),
            self.user.clone(),
            "-d".to_string(),
            self.database.clone(),
            "--no-password".to_string(),
        ]
    }

    /// Data-only INSERT dump of one table into `output`
    pub fn dump_args(&self, table: &str, output: &Path) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend([
            "--data-only".to_string(),
            "--column-inserts".to_string(),
            "--table".to_string(),
            table.to_string(),
            "-f".to_string(),
            output.display().to_string(),
        ]);
        args
    }

    /// Replay of `input`, stopping at the first error
    pub fn restore_args(&self, input: &Path) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend([
            "-v".to_string(),
            "ON_ERROR_STOP=1".to_string(),
            "--single-transaction".to_string(),
            "-f".to_string(),
            input.display().to_string(),
        ]);
        args
    }

    pub async fn dump(&self, table: &str, output: &Path) -> ToolResult<()> {
        let args = self.dump_args(table, output);
        self.run(&self.dump_binary, &args).await
    }

    pub async fn restore(&self, input: &Path) -> ToolResult<()> {
        let args = self.restore_args(input);
        self.run(&self.restore_binary, &args).await
    }

    async fn run(&self, tool: &str, args: &[String]) -> ToolResult<()> {
        debug!(tool, ?args, "starting native tool");

        let mut command = Command::new(tool);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = &self.password {
            command.env(PASSWORD_ENV, password);
        }

        let child = command.spawn().map_err(|e| ToolError::Spawn {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?;

        let output = tokio::time::timeout(self.run_timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout {
                tool: tool.to_string(),
                seconds: self.run_timeout.as_secs(),
            })?
            .map_err(|e| ToolError::Io {
                tool: tool.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ToolError::ExitStatus {
                tool: tool.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(tool, "native tool finished");
        Ok(())
    }
}
