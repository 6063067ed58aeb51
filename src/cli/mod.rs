//! CLI module for pixelvault
//!
//! Provides command-line interface for:
//! - run: Bootstrap the subsystem and serve background loops until Ctrl-C
//! - backup: Export one artifact
//! - restore: Import one artifact
//! - status: Report connectivity and record count
//! - clean: Apply retention to the backups directory
//! - tools: Report whether the native dump/restore tools are usable

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{backup, clean, restore, run, run_command, serve, status, tools};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
