//! CLI argument definitions using clap
//!
//! Commands:
//! - pixelvault run --config <path>
//! - pixelvault backup --config <path> [--out <file>]
//! - pixelvault restore --config <path> <file>
//! - pixelvault status --config <path>
//! - pixelvault clean --config <path> [--keep <n>]
//! - pixelvault tools --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pixelvault - persistence resilience for the image store
#[derive(Parser, Debug)]
#[command(name = "pixelvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect and run the health, integrity and backup loops until Ctrl-C
    Run {
        /// Path to configuration file
        #[arg(long, default_value = "./pixelvault.json")]
        config: PathBuf,
    },

    /// Write a backup artifact
    Backup {
        /// Path to configuration file
        #[arg(long, default_value = "./pixelvault.json")]
        config: PathBuf,

        /// Artifact path; defaults to a timestamped file in the backups directory
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Import a backup artifact
    Restore {
        /// Path to configuration file
        #[arg(long, default_value = "./pixelvault.json")]
        config: PathBuf,

        /// Artifact to import
        path: PathBuf,
    },

    /// Report connectivity and record count
    Status {
        /// Path to configuration file
        #[arg(long, default_value = "./pixelvault.json")]
        config: PathBuf,
    },

    /// Delete all but the newest artifacts
    Clean {
        /// Path to configuration file
        #[arg(long, default_value = "./pixelvault.json")]
        config: PathBuf,

        /// Artifacts to keep; defaults to backups.keep
        #[arg(long)]
        keep: Option<usize>,
    },

    /// Detect the native dump and restore tools
    Tools {
        /// Path to configuration file
        #[arg(long, default_value = "./pixelvault.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
